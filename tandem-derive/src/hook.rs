//! Implementation of the `#[derive(Hook)]` macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput};

/// Expand `#[derive(Hook)]` into a `HookType` implementation.
pub(crate) fn expand_hook(input: &DeriveInput) -> syn::Result<TokenStream> {
    let Data::Struct(_) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Hook can only be derived for structs",
        ));
    };

    let name = &input.ident;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::tandem::hook::HookType for #name #ty_generics #where_clause {
            const NAME: &'static str = #name_str;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn expands_for_struct() {
        let input: DeriveInput = parse_quote! {
            struct Approval {
                granted: bool,
            }
        };
        let expanded = expand_hook(&input).unwrap().to_string();
        assert!(expanded.contains("HookType"));
        assert!(expanded.contains("\"Approval\""));
    }

    #[test]
    fn rejects_enums() {
        let input: DeriveInput = parse_quote! {
            enum Decision {
                Yes,
                No,
            }
        };
        assert!(expand_hook(&input).is_err());
    }
}
