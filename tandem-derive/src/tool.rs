//! Implementation of the `#[tool]` attribute macro.
//!
//! This module transforms functions into tool implementations usable with
//! the tandem runtime.

use convert_case::{Case, Casing};
use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use std::collections::HashMap;
use syn::{
    Expr, ExprLit, FnArg, Ident, ItemFn, Lit, Meta, Pat, PathArguments, ReturnType, Token, Type,
    parse::{Parse, ParseStream},
    punctuated::Punctuated,
};

/// Parsed arguments from the `#[tool(...)]` attribute.
#[derive(Default)]
pub(crate) struct ToolMacroArgs {
    pub description: Option<String>,
    pub param_descriptions: HashMap<String, String>,
}

impl Parse for ToolMacroArgs {
    fn parse(input: ParseStream<'_>) -> syn::Result<Self> {
        let mut result = Self::default();

        if input.is_empty() {
            return Ok(result);
        }

        let meta_list: Punctuated<Meta, Token![,]> = Punctuated::parse_terminated(input)?;

        for meta in meta_list {
            result.parse_meta_item(meta)?;
        }

        Ok(result)
    }
}

impl ToolMacroArgs {
    /// Parse a single meta item from the attribute arguments.
    fn parse_meta_item(&mut self, meta: Meta) -> syn::Result<()> {
        match meta {
            Meta::NameValue(nv) => {
                let ident = nv
                    .path
                    .get_ident()
                    .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected identifier"))?;

                if ident == "description" {
                    self.description = Some(extract_string_lit(&nv.value)?);
                }
                // Silently ignore unknown name-value pairs for forward compatibility
            }
            Meta::List(list) if list.path.is_ident("params") => {
                self.parse_params_list(&list)?;
            }
            _ => {
                // Silently ignore unknown meta items for forward compatibility
            }
        }
        Ok(())
    }

    /// Parse the `params(...)` nested list.
    fn parse_params_list(&mut self, list: &syn::MetaList) -> syn::Result<()> {
        let nested: Punctuated<Meta, Token![,]> =
            list.parse_args_with(Punctuated::parse_terminated)?;

        for meta in nested {
            if let Meta::NameValue(nv) = meta {
                let param_name = nv
                    .path
                    .get_ident()
                    .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected parameter name"))?
                    .to_string();
                let description = extract_string_lit(&nv.value)?;
                self.param_descriptions.insert(param_name, description);
            }
        }
        Ok(())
    }
}

/// Extract a string literal from an expression.
fn extract_string_lit(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(lit_str),
            ..
        }) => Ok(lit_str.value()),
        _ => Err(syn::Error::new_spanned(expr, "expected string literal")),
    }
}

/// Information extracted from a function's return type.
struct ReturnTypeInfo {
    output_type: TokenStream,
    error_type: TokenStream,
}

/// Extract Output and Error types from a `Result<T, E>` return type.
fn extract_result_types(return_type: &ReturnType) -> syn::Result<ReturnTypeInfo> {
    let ReturnType::Type(_, ty) = return_type else {
        return Err(syn::Error::new_spanned(
            return_type,
            "tool function must have a return type of `Result<T, E>`",
        ));
    };

    let Type::Path(type_path) = ty.as_ref() else {
        return Err(syn::Error::new_spanned(
            ty,
            "return type must be a path type (e.g., `Result<T, E>`)",
        ));
    };

    let last_segment = type_path
        .path
        .segments
        .last()
        .ok_or_else(|| syn::Error::new_spanned(&type_path.path, "invalid return type path"))?;

    if last_segment.ident != "Result" {
        return Err(syn::Error::new_spanned(
            &last_segment.ident,
            "return type must be `Result<T, E>`",
        ));
    }

    let PathArguments::AngleBracketed(args) = &last_segment.arguments else {
        return Err(syn::Error::new_spanned(
            &last_segment.arguments,
            "expected angle bracketed type parameters for Result",
        ));
    };

    if args.args.len() != 2 {
        return Err(syn::Error::new_spanned(
            args,
            "Result must have exactly two type parameters: Result<T, E>",
        ));
    }

    let output = &args.args[0];
    let error = &args.args[1];

    Ok(ReturnTypeInfo {
        output_type: quote!(#output),
        error_type: quote!(#error),
    })
}

/// Information about a single function parameter.
struct ParamInfo<'a> {
    name: &'a Ident,
    ty: &'a Type,
    description: String,
    runtime: Option<RuntimeBinding>,
}

/// How a runtime-typed parameter is received.
enum RuntimeBinding {
    ByRef,
    ByValue,
}

/// Detect a parameter typed `Runtime` or `&Runtime`.
fn runtime_binding(ty: &Type) -> Option<RuntimeBinding> {
    let (inner, binding) = match ty {
        Type::Reference(reference) => (reference.elem.as_ref(), RuntimeBinding::ByRef),
        other => (other, RuntimeBinding::ByValue),
    };
    let Type::Path(type_path) = inner else {
        return None;
    };
    type_path
        .path
        .segments
        .last()
        .filter(|segment| segment.ident == "Runtime")
        .map(|_| binding)
}

/// Extract parameter information from function arguments.
fn extract_params<'a>(
    inputs: impl Iterator<Item = &'a FnArg>,
    param_descriptions: &HashMap<String, String>,
) -> Vec<ParamInfo<'a>> {
    inputs
        .filter_map(|arg| {
            let FnArg::Typed(pat_type) = arg else {
                return None;
            };
            let Pat::Ident(param_ident) = pat_type.pat.as_ref() else {
                return None;
            };

            let name = &param_ident.ident;
            let name_str = name.to_string();
            let ty = pat_type.ty.as_ref();
            let description = param_descriptions
                .get(&name_str)
                .cloned()
                .unwrap_or_else(|| format!("Parameter {name_str}"));

            Some(ParamInfo {
                name,
                ty,
                description,
                runtime: runtime_binding(ty),
            })
        })
        .collect()
}

/// Main entry point for the `#[tool]` macro expansion.
pub(crate) fn expand_tool(args: ToolMacroArgs, input_fn: ItemFn) -> syn::Result<TokenStream> {
    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let fn_span = input_fn.sig.ident.span();
    let is_async = input_fn.sig.asyncness.is_some();

    // Extract return type information
    let return_info = extract_result_types(&input_fn.sig.output)?;

    // Generate struct names
    let struct_name = format_ident!("{}", fn_name_str.to_case(Case::Pascal));
    let params_struct_name = format_ident!("{}Parameters", struct_name);
    let static_name = format_ident!("{}", fn_name_str.to_uppercase());

    // Extract parameter information; runtime-typed parameters are injected
    // at call time and never shown to the model.
    let params = extract_params(input_fn.sig.inputs.iter(), &args.param_descriptions);

    let schema_params: Vec<&ParamInfo<'_>> =
        params.iter().filter(|p| p.runtime.is_none()).collect();
    let field_names: Vec<_> = schema_params.iter().map(|p| p.name).collect();
    let field_types: Vec<_> = schema_params.iter().map(|p| p.ty).collect();
    let field_descriptions: Vec<_> = schema_params.iter().map(|p| &p.description).collect();

    let call_args: Vec<TokenStream> = params
        .iter()
        .map(|p| {
            let name = p.name;
            match &p.runtime {
                Some(RuntimeBinding::ByRef) => quote!(runtime),
                Some(RuntimeBinding::ByValue) => quote!(runtime.clone()),
                None => quote!(args.#name),
            }
        })
        .collect();

    // Generate description
    let tool_description = match args.description {
        Some(desc) => quote! { #desc.to_string() },
        None => quote! { format!("Function to {}", Self::NAME) },
    };

    // Generate the call body based on async/sync
    let call_body = if is_async {
        quote! { #fn_name(#(#call_args,)*).await }
    } else {
        quote! { #fn_name(#(#call_args,)*) }
    };

    let output_type = &return_info.output_type;
    let error_type = &return_info.error_type;
    let output_type_str = output_type.to_string();

    // Generate the expanded code with proper spans for error messages
    let expanded = quote_spanned! {fn_span=>
        #[derive(::serde::Deserialize, ::schemars::JsonSchema)]
        pub(crate) struct #params_struct_name {
            #(
                #[schemars(description = #field_descriptions)]
                #field_names: #field_types,
            )*
        }

        #input_fn

        #[derive(Default)]
        pub(crate) struct #struct_name;

        #[::tandem::__async_trait]
        impl ::tandem::tool::Tool for #struct_name {
            const NAME: &'static str = #fn_name_str;

            type Args = #params_struct_name;
            type Output = #output_type;
            type Error = #error_type;

            fn description(&self) -> ::std::string::String {
                #tool_description
            }

            fn return_type(&self) -> ::std::option::Option<::std::string::String> {
                ::std::option::Option::Some(#output_type_str.to_string())
            }

            async fn call(
                &self,
                args: Self::Args,
                runtime: &::tandem::runtime::Runtime,
            ) -> ::core::result::Result<Self::Output, Self::Error> {
                let _ = (&args, runtime);
                #call_body
            }
        }

        pub(crate) static #static_name: #struct_name = #struct_name;
    };

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn expands_async_fn() {
        let input: ItemFn = parse_quote! {
            async fn double(x: i64) -> Result<i64, ToolError> {
                Ok(x * 2)
            }
        };
        let expanded = expand_tool(ToolMacroArgs::default(), input)
            .unwrap()
            .to_string();
        assert!(expanded.contains("DoubleParameters"));
        assert!(expanded.contains("DOUBLE"));
        assert!(expanded.contains("\"double\""));
    }

    #[test]
    fn runtime_param_excluded_from_schema_struct() {
        let input: ItemFn = parse_quote! {
            async fn introspect(query: String, rt: &Runtime) -> Result<String, ToolError> {
                Ok(query)
            }
        };
        let expanded = expand_tool(ToolMacroArgs::default(), input)
            .unwrap()
            .to_string();
        // The parameters struct holds only `query`; `rt` is injected and
        // the struct body closes right after it.
        assert!(expanded.contains("IntrospectParameters"));
        assert!(expanded.contains("query : String , }"));
    }

    #[test]
    fn rejects_missing_result_return() {
        let input: ItemFn = parse_quote! {
            async fn bad(x: i64) -> i64 {
                x
            }
        };
        assert!(expand_tool(ToolMacroArgs::default(), input).is_err());
    }
}
