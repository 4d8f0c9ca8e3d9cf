//! `#[remote_service]` implementation
//!
//! The macro consumes a trait of `async fn` signatures and emits a struct of
//! the same name wrapping a `cnxlink_client::ServiceProxy`. Each signature
//! becomes an inherent async method whose arguments are serialized, in order,
//! into the positional `args` array of the remote call.
//!
//! # Code Generation Example
//!
//! Input:
//! ```ignore
//! #[remote_service("User")]
//! pub trait User {
//!     async fn create(&self, payload: NewUser) -> Result<UserRecord>;
//!     #[action("findById")]
//!     async fn find(&self, id: u64) -> Result<UserRecord>;
//! }
//! ```
//!
//! Generated output:
//! ```ignore
//! #[derive(Clone, Debug)]
//! pub struct User {
//!     proxy: ::cnxlink_client::ServiceProxy,
//! }
//!
//! impl User {
//!     pub const SERVICE: &'static str = "User";
//!
//!     pub fn new(client: &::cnxlink_client::Client) -> Self { ... }
//!     pub fn proxy(&self) -> &::cnxlink_client::ServiceProxy { ... }
//!
//!     pub async fn create(&self, payload: NewUser) -> Result<UserRecord> {
//!         let args = vec![::cnxlink_client::to_arg(&payload)?];
//!         self.proxy.call_as("create", args).await
//!     }
//!
//!     pub async fn find(&self, id: u64) -> Result<UserRecord> {
//!         let args = vec![::cnxlink_client::to_arg(&id)?];
//!         self.proxy.call_as("findById", args).await
//!     }
//! }
//! ```

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{parse_quote, Attribute, FnArg, ItemTrait, LitStr, Pat, ReturnType, TraitItem, TraitItemFn};

const ACTION_ATTR: &str = "action";

/// Expand `#[remote_service(...)]` applied to `item`
pub fn remote_service_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let input: ItemTrait = syn::parse2(item)?;

    let service = if attr.is_empty() {
        LitStr::new(&input.ident.to_string(), input.ident.span())
    } else {
        syn::parse2::<LitStr>(attr)?
    };

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "remote services cannot be generic",
        ));
    }

    let methods = input
        .items
        .iter()
        .map(|item| match item {
            TraitItem::Fn(method) => expand_method(method),
            other => Err(syn::Error::new(
                other.span(),
                "remote services may only declare async methods",
            )),
        })
        .collect::<syn::Result<Vec<_>>>()?;

    let vis = &input.vis;
    let ident = &input.ident;
    let attrs = &input.attrs;

    Ok(quote! {
        #(#attrs)*
        #[derive(Clone, Debug)]
        #vis struct #ident {
            proxy: ::cnxlink_client::ServiceProxy,
        }

        impl #ident {
            /// Remote service name
            pub const SERVICE: &'static str = #service;

            /// Bind to the service on `client`
            pub fn new(client: &::cnxlink_client::Client) -> Self {
                Self {
                    proxy: client.service(Self::SERVICE),
                }
            }

            /// Underlying untyped proxy
            pub fn proxy(&self) -> &::cnxlink_client::ServiceProxy {
                &self.proxy
            }

            #(#methods)*
        }
    })
}

fn expand_method(method: &TraitItemFn) -> syn::Result<TokenStream> {
    let mut sig = method.sig.clone();

    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.fn_token.span(), "remote service methods must be async"));
    }
    if let Some(default) = &method.default {
        return Err(syn::Error::new(default.span(), "remote service methods cannot have a body"));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver)) if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new(
                sig.ident.span(),
                "remote service methods take `&self` first",
            ))
        }
    }

    let args = inputs
        .map(|arg| match arg {
            FnArg::Typed(pat_type) => match &*pat_type.pat {
                Pat::Ident(pat_ident) => {
                    let name = &pat_ident.ident;
                    Ok(quote_spanned! {name.span()=> ::cnxlink_client::to_arg(&#name)?})
                }
                other => Err(syn::Error::new(other.span(), "use a plain identifier for each argument")),
            },
            FnArg::Receiver(receiver) => Err(syn::Error::new(receiver.span(), "unexpected receiver")),
        })
        .collect::<syn::Result<Vec<_>>>()?;

    let action = action_name(&method.attrs)?.unwrap_or_else(|| LitStr::new(&sig.ident.to_string(), sig.ident.span()));
    let attrs = method.attrs.iter().filter(|attr| !attr.path().is_ident(ACTION_ATTR));

    let call = match &sig.output {
        ReturnType::Default => {
            sig.output = parse_quote!(-> ::cnxlink_client::Result<()>);
            quote! { self.proxy.call(#action, args).await.map(|_| ()) }
        }
        ReturnType::Type(..) => quote! { self.proxy.call_as(#action, args).await },
    };

    Ok(quote! {
        #(#attrs)*
        pub #sig {
            let args = ::std::vec![#(#args),*];
            #call
        }
    })
}

fn action_name(attrs: &[Attribute]) -> syn::Result<Option<LitStr>> {
    let mut found = None;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident(ACTION_ATTR)) {
        if found.is_some() {
            return Err(syn::Error::new(attr.span(), "duplicate #[action] attribute"));
        }
        found = Some(attr.parse_args::<LitStr>()?);
    }
    Ok(found)
}
