//! Helper macros shared by the rdpmux codecs.

/// Resolves to the path of the enclosing function.
#[macro_export]
macro_rules! function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            core::any::type_name::<T>()
        }
        let name = type_name_of(f);
        name.strip_suffix("::f").unwrap_or(name)
    }};
}

/// Returns early with a "not enough bytes" error when the cursor or buffer
/// holds fewer than `size` bytes.
#[macro_export]
macro_rules! ensure_size {
    (ctx: $ctx:expr, in: $buf:ident, size: $expected:expr) => {{
        let received = $buf.len();
        let expected = $expected;
        if !(received >= expected) {
            return Err($crate::not_enough_bytes_err($ctx, received, expected));
        }
    }};
    (in: $buf:ident, size: $expected:expr) => {{
        $crate::ensure_size!(ctx: $crate::function!(), in: $buf, size: $expected)
    }};
}

/// Shorthand for `ensure_size!` against `Self::FIXED_PART_SIZE`, using
/// `Self::NAME` as context.
#[macro_export]
macro_rules! ensure_fixed_part_size {
    (in: $buf:ident) => {
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: Self::FIXED_PART_SIZE)
    };
}

/// Fallible integral conversion for length and count fields.
#[macro_export]
macro_rules! cast_length {
    ($ctx:expr, $field:expr, $len:expr) => {
        $len.try_into()
            .map_err(|e| $crate::invalid_field_err_with_source($ctx, $field, "out of range integral cast", e))
    };
    ($field:expr, $len:expr) => {
        $crate::cast_length!($crate::function!(), $field, $len)
    };
}

/// Asserts that the traits support dynamic dispatch.
#[macro_export]
macro_rules! assert_obj_safe {
    ($($xs:path),+ $(,)?) => {
        $(const _: Option<&dyn $xs> = None;)+
    };
}

/// Asserts that the type implements _all_ of the given traits.
#[macro_export]
macro_rules! assert_impl {
    ($type:ty: $($trait:path),+ $(,)?) => {
        const _: fn() = || {
            fn assert_impl_all<T: ?Sized $(+ $trait)+>() {}
            assert_impl_all::<$type>();
        };
    };
}

#[macro_export]
macro_rules! invalid_field_err {
    ($ctx:expr, $field:expr, $reason:expr) => {
        $crate::invalid_field_err($ctx, $field, $reason)
    };
    ($field:expr, $reason:expr) => {
        $crate::invalid_field_err($crate::function!(), $field, $reason)
    };
}

#[macro_export]
macro_rules! unexpected_message_type_err {
    ($ctx:expr, $got:expr) => {
        $crate::unexpected_message_type_err($ctx, $got)
    };
    ($got:expr) => {
        $crate::unexpected_message_type_err($crate::function!(), $got)
    };
}

#[macro_export]
macro_rules! unsupported_version_err {
    ($ctx:expr, $got:expr) => {
        $crate::unsupported_version_err($ctx, $got)
    };
    ($got:expr) => {
        $crate::unsupported_version_err($crate::function!(), $got)
    };
}

#[macro_export]
macro_rules! unsupported_value_err {
    ($ctx:expr, $name:expr, $value:expr) => {
        $crate::unsupported_value_err($ctx, $name, $value)
    };
    ($name:expr, $value:expr) => {
        $crate::unsupported_value_err($crate::function!(), $name, $value)
    };
}

#[macro_export]
macro_rules! other_err {
    ($ctx:expr, source: $source:expr $(,)?) => {
        $crate::other_err_with_source($ctx, "", $source)
    };
    ($ctx:expr, $description:expr $(,)?) => {
        $crate::other_err($ctx, $description)
    };
    (source: $source:expr $(,)?) => {
        $crate::other_err_with_source($crate::function!(), "", $source)
    };
    ($description:expr $(,)?) => {
        $crate::other_err($crate::function!(), $description)
    };
}

#[macro_export]
macro_rules! read_padding {
    ($src:expr, $n:expr) => {
        $crate::read_padding($src, $n)
    };
}

#[macro_export]
macro_rules! write_padding {
    ($dst:expr, $n:expr) => {
        $crate::write_padding($dst, $n)
    };
}
