
use proc_macro::TokenStream;

/// Attributes:
/// * decimals = N: builds the test chain with a native denom of `N` decimals (default 6)
#[proc_macro_attribute]
pub fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    test::test_macro(args.into(), item.into()).into()
}
