//! Procedural macros for the tandem agent workflow runtime.
//!
//! - [`macro@tool`] - Attribute macro turning an async function into a
//!   `tandem::tool::Tool`
//! - [`Hook`] - Derive macro declaring a payload struct as a hook type

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{DeriveInput, ItemFn, parse_macro_input};

mod hook;
mod tool;

/// Attribute macro that transforms a function into a `tandem::tool::Tool`.
///
/// The function's parameters become the tool's argument schema; a
/// parameter typed `&Runtime` is excluded from the schema and injected
/// with the active runtime at call time. The function must return
/// `Result<T, E>` with `E: Into<ToolError>`.
///
/// # Arguments
///
/// - `description` - Optional description of the tool for LLM context
/// - `params(...)` - Optional parameter descriptions for each argument
///
/// # Examples
///
/// ## Basic Usage
/// ```rust,ignore
/// use tandem_derive::tool;
///
/// #[tool(description = "Double a number")]
/// async fn double(x: i64) -> Result<i64, tandem::error::ToolError> {
///     Ok(x * 2)
/// }
/// ```
///
/// ## Streaming progress through the runtime
/// ```rust,ignore
/// #[tool(
///     description = "Ask the mothership a question",
///     params(question = "The question to transmit")
/// )]
/// async fn contact_mothership(
///     question: String,
///     runtime: &Runtime,
/// ) -> Result<String, tandem::error::ToolError> {
///     runtime.put_message(Message::assistant("Transmitting...").with_label("tool_progress"));
///     Ok(format!("Mothership response: {question} -> Soon."))
/// }
/// ```
///
/// # Generated Code
///
/// For a function `my_tool`, this macro generates:
/// - `MyToolParameters` - A struct for deserialising and describing arguments
/// - `MyTool` - A struct implementing `tandem::tool::Tool`
/// - `MY_TOOL` - A static instance of the tool, ready for registration
#[proc_macro_attribute]
pub fn tool(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as tool::ToolMacroArgs);
    let input_fn = parse_macro_input!(input as ItemFn);

    tool::expand_tool(args, input_fn)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derive macro declaring a payload struct as a hook type.
///
/// Implements `tandem::hook::HookType` with `NAME` set to the struct's
/// name. The struct must also implement `serde::Serialize` and
/// `serde::Deserialize`; it is the hook's declared schema.
///
/// # Example
/// ```rust,ignore
/// #[derive(Debug, Serialize, Deserialize, Hook)]
/// struct Approval {
///     granted: bool,
/// }
/// ```
#[proc_macro_derive(Hook)]
pub fn derive_hook(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);

    hook::expand_hook(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
