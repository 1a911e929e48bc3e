/// 创建一个带有索引的常量表
///
/// 枚举的每个变体对应表中的一个值，变体顺序即索引顺序。
///
/// ```ignore
/// enumed_map!(pub GBufferTarget<vk::Format>: {
///     Normal: vk::Format::R16G16B16A16_SFLOAT,
///     Depth: vk::Format::D32_SFLOAT,
/// });
/// assert_eq!(*GBufferTarget::Depth.value(), vk::Format::D32_SFLOAT);
/// ```
#[macro_export]
macro_rules! enumed_map {
    ($vis:vis $enum_name:ident<$vtype:ty>: { $($variant:ident: $value:expr),* $(,)? }) => {
        #[repr(usize)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $enum_name {
            $($variant,)*
        }

        impl $enum_name {
            pub const COUNT: usize = $crate::count_indexed_array!($($variant),*);
            const VARIANTS: [Self; $crate::count_indexed_array!($($variant),*)] = [$(Self::$variant,)*];

            fn get_array() -> &'static [$vtype; Self::COUNT] {
                // 值可能不是 const 表达式，延迟初始化
                static ARRAY: std::sync::OnceLock<[$vtype; $crate::count_indexed_array!($($variant),*)]> =
                    std::sync::OnceLock::new();

                ARRAY.get_or_init(|| [
                    $($value,)*
                ])
            }

            #[inline]
            pub fn value(self) -> &'static $vtype {
                &Self::get_array()[self as usize]
            }

            #[inline]
            pub const fn index(self) -> usize {
                self as usize
            }

            #[inline]
            pub fn iter() -> impl Iterator<Item = Self> {
                Self::VARIANTS.into_iter()
            }

            #[inline]
            pub fn array() -> &'static [$vtype; Self::COUNT] {
                Self::get_array()
            }
        }
    };
}

/// 辅助宏，计算变体数量
#[macro_export]
macro_rules! count_indexed_array {
    () => (0);
    ($head:tt $(, $tail:tt)*) => (1 + $crate::count_indexed_array!($($tail),*));
}

#[cfg(test)]
mod tests {
    enumed_map!(Stage<&'static str>: {
        Vertex: "vs_main",
        Fragment: "ps_main",
        Compute: "cs_main",
    });

    #[test]
    fn test_value_follows_variant_order() {
        assert_eq!(Stage::COUNT, 3);
        assert_eq!(*Stage::Fragment.value(), "ps_main");
        assert_eq!(Stage::Compute.index(), 2);

        let names: Vec<_> = Stage::iter().map(|s| *s.value()).collect();
        assert_eq!(names, vec!["vs_main", "ps_main", "cs_main"]);
    }
}
