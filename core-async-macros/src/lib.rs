//! Attribute macros that run an `async fn` body through the bridge.
//!
//! `#[core_async::main]` and `#[core_async::test]` turn an `async fn` into a
//! plain fn whose body is driven to completion by
//! `core_async::bridge::block_on` on the calling thread. A failure raised
//! inside the body (a panic) surfaces as a panic carrying the bridge error.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Main)
}

enum MacroKind {
    Test,
    Main,
}

fn expand(attr: TokenStream, item: TokenStream, kind: MacroKind) -> TokenStream {
    if !attr.is_empty() {
        let tokens = TokenStream2::from(attr);
        return syn::Error::new_spanned(tokens, "core_async attribute macros take no arguments")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "core_async attribute macros require `async fn`",
        )
        .to_compile_error()
        .into();
    }

    if !input.sig.inputs.is_empty() {
        return syn::Error::new_spanned(
            &input.sig.inputs,
            "bridged entry points cannot take arguments",
        )
        .to_compile_error()
        .into();
    }

    let mut sync_sig = input.sig.clone();
    sync_sig.asyncness = None;

    let attrs = input.attrs;
    let vis = input.vis;
    let body = bridged_body(&input.block);

    let test_attr = match kind {
        MacroKind::Test => quote!(#[test]),
        MacroKind::Main => TokenStream2::new(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sync_sig {
            #body
        }
    }
    .into()
}

/// Wraps the original block in an infallible operation and hands it to the
/// bridge; the block's own output type becomes the fn's return value.
fn bridged_body(block: &syn::Block) -> TokenStream2 {
    quote! {
        let operation = async move {
            let output = async move #block.await;
            ::core::result::Result::<_, ::std::convert::Infallible>::Ok(output)
        };
        match ::core_async::bridge::block_on(operation) {
            ::core::result::Result::Ok(output) => output,
            ::core::result::Result::Err(err) => ::core::panic!("{}", err),
        }
    }
}
