//! Macros for building and returning [`crate::error::TapError`] values.

/// Creates a [`crate::error::TapError`] from a kind, a static description and optional detail
/// and source.
///
/// Use `detail = expr` to move an owned [`String`] in without formatting it again.
#[macro_export]
macro_rules! tap_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::TapError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::TapError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::TapError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::TapError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::TapError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::TapError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with a [`crate::error::TapError`]. Accepts the same arguments as [`tap_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::tap_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::tap_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        return ::core::result::Result::Err($crate::tap_error!($kind, $desc, detail = $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::tap_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::tap_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
