use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr};

/// Derives a static handler table for an enum of command handlers.
///
/// # Usage
///
/// ```ignore
/// #[derive(Handlers)]
/// enum Commands {
///     #[hark(handler = handlers::ping)]
///     Ping,
///
///     #[hark(id = "mod.ban", handler = handlers::ban)]
///     Ban,
/// }
/// ```
///
/// This will generate:
///
/// ```ignore
/// impl Commands {
///     pub const ALL: &'static [Commands] = &[Commands::Ping, Commands::Ban];
///
///     pub fn id(&self) -> &'static str {
///         match self {
///             Commands::Ping => "ping",
///             Commands::Ban => "mod.ban",
///         }
///     }
///
///     pub fn handler_table() -> hark_engine::HandlerTable {
///         let mut table = hark_engine::HandlerTable::new();
///         table.insert("ping", handlers::ping);
///         table.insert("mod.ban", handlers::ban);
///         table
///     }
/// }
/// ```
///
/// Without an explicit `id` the snake_cased variant name is used. Keys are
/// matched against a command's full id unless its manifest names a handler.
#[proc_macro_derive(Handlers, attributes(hark))]
pub fn derive_handlers(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct HandlerVariant {
    ident: syn::Ident,
    id: String,
    handler: syn::Path,
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let enum_name = &input.ident;

    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            enum_name,
            "Handlers can only be derived for enums",
        ));
    };

    let variants = data
        .variants
        .iter()
        .map(|variant| {
            if !matches!(variant.fields, Fields::Unit) {
                return Err(syn::Error::new_spanned(
                    variant,
                    "Handlers variants must be unit variants",
                ));
            }
            parse_variant(variant)
        })
        .collect::<syn::Result<Vec<_>>>()?;

    let all = variants.iter().map(|v| {
        let ident = &v.ident;
        quote! { #enum_name::#ident }
    });
    let id_arms = variants.iter().map(|v| {
        let ident = &v.ident;
        let id = &v.id;
        quote! { #enum_name::#ident => #id, }
    });
    let inserts = variants.iter().map(|v| {
        let id = &v.id;
        let handler = &v.handler;
        quote! { table.insert(#id, #handler); }
    });

    Ok(quote! {
        impl #enum_name {
            pub const ALL: &'static [#enum_name] = &[#(#all),*];

            pub fn id(&self) -> &'static str {
                match self {
                    #(#id_arms)*
                }
            }

            pub fn handler_table() -> ::hark_engine::HandlerTable {
                let mut table = ::hark_engine::HandlerTable::new();
                #(#inserts)*
                table
            }
        }
    })
}

/// Read `#[hark(id = "...", handler = path)]` from a variant
fn parse_variant(variant: &syn::Variant) -> syn::Result<HandlerVariant> {
    let mut id: Option<String> = None;
    let mut handler: Option<syn::Path> = None;

    for attr in &variant.attrs {
        if !attr.path().is_ident("hark") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                let lit: LitStr = meta.value()?.parse()?;
                id = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("handler") {
                handler = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `id` or `handler`"))
            }
        })?;
    }

    let handler = handler.ok_or_else(|| {
        syn::Error::new_spanned(
            &variant.ident,
            format!(
                "Missing #[hark(handler = path::to::handler)] attribute on variant {}",
                variant.ident
            ),
        )
    })?;

    Ok(HandlerVariant {
        id: id.unwrap_or_else(|| snake_case(&variant.ident.to_string())),
        ident: variant.ident.clone(),
        handler,
    })
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
