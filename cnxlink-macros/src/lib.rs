//! Procedural macros for cnxlink
//!
//! # Available Macros
//!
//! ## `#[remote_service]` - typed service wrapper
//!
//! Turns a trait of `async fn` signatures into a struct that calls the
//! matching remote actions through a `cnxlink_client::ServiceProxy`. Argument
//! types must implement `serde::Serialize`; the success type of each return
//! must implement `serde::de::DeserializeOwned`.
//!
//! Without macros, you'd write:
//!
//! ```ignore
//! let user = client.service("User");
//! let record: UserRecord = user
//!     .call_as("create", vec![cnxlink_client::to_arg(&payload)?])
//!     .await?;
//! ```
//!
//! With macros, you write:
//!
//! ```ignore
//! #[remote_service("User")]
//! pub trait User {
//!     async fn create(&self, payload: NewUser) -> Result<UserRecord>;
//! }
//!
//! let record = User::new(&client).create(payload).await?;
//! ```

mod remote_service;

use proc_macro::TokenStream;

/// Generate a typed wrapper for a remote service
///
/// The argument is the remote service name; it defaults to the trait name.
/// The trait itself is replaced by a struct of the same name with:
///
/// - `SERVICE`: the remote service name
/// - `new(&Client)`: bind to the service on a client
/// - `proxy()`: the underlying `ServiceProxy`, for `on(...)` or `with_timeout`
/// - one `pub async fn` per declared method
///
/// Methods must be `async`, take `&self`, and name each argument with a plain
/// identifier. A method without a return type returns
/// `cnxlink_client::Result<()>`. Annotate a method with `#[action("name")]`
/// when the wire action name differs from the method name.
///
/// # Examples
///
/// ```ignore
/// use cnxlink_client::Result;
/// use cnxlink_macros::remote_service;
///
/// #[remote_service("Orders")]
/// pub trait Orders {
///     async fn list(&self, page: u32) -> Result<Vec<Order>>;
///
///     #[action("cancelOrder")]
///     async fn cancel(&self, id: u64);
/// }
///
/// let orders = Orders::new(&client);
/// let first_page = orders.list(1).await?;
/// orders.cancel(first_page[0].id).await?;
/// ```
#[proc_macro_attribute]
pub fn remote_service(attr: TokenStream, item: TokenStream) -> TokenStream {
    remote_service::remote_service_impl(attr.into(), item.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Override the wire action name of a `#[remote_service]` method
///
/// Only meaningful inside a `#[remote_service]` trait, which strips it.
#[proc_macro_attribute]
pub fn action(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut output: TokenStream = syn::Error::new(
        proc_macro2::Span::call_site(),
        "#[action] is only valid on methods of a #[remote_service] trait",
    )
    .into_compile_error()
    .into();
    output.extend(item);
    output
}
