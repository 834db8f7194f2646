//! Helper macros for PDU encoding and decoding
//!
//! Some are exported and available to external crates

#[macro_export]
macro_rules! decode_err {
    ($source:expr $(,)? ) => {
        <$crate::PduError as $crate::PduErrorExt>::decode($crate::rdpmux_core::function!(), $source)
    };
}

#[macro_export]
macro_rules! encode_err {
    ($source:expr $(,)? ) => {
        <$crate::PduError as $crate::PduErrorExt>::encode($crate::rdpmux_core::function!(), $source)
    };
}

#[macro_export]
macro_rules! pdu_other_err {
    ( $context:expr, $description:expr, source: $source:expr $(,)? ) => {{
        $crate::PduError::new($context, $crate::PduErrorKind::Other { description: $description })
            .with_source($source)
    }};
    ( $context:expr, $description:expr $(,)? ) => {{
        $crate::PduError::new($context, $crate::PduErrorKind::Other { description: $description })
    }};
    ( source: $source:expr $(,)? ) => {{
        $crate::pdu_other_err!($crate::rdpmux_core::function!(), "", source: $source)
    }};
    ( $description:expr $(,)? ) => {{
        $crate::pdu_other_err!($crate::rdpmux_core::function!(), $description)
    }};
}
