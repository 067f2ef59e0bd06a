mod message;
mod record;

use proc_macro::TokenStream;

use message::Kind;

// ============================================================================
// Message derives
// ============================================================================

/// Derive macro for the `Command` trait (and its `Message` supertrait).
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Command)]
/// #[message(name = "CreateOrder", output = OrderId)]
/// struct CreateOrder {
///     pub customer_id: String,
/// }
/// ```
///
/// - `name = "..."` sets the stable discriminator stored in outbox rows.
///   If omitted, defaults to the struct name.
/// - `output = Type` sets the handler result type. Defaults to `()`.
#[proc_macro_derive(Command, attributes(message))]
pub fn derive_command(input: TokenStream) -> TokenStream {
    message::derive_message(input, Kind::Command)
}

/// Derive macro for the `Query` trait. Same attributes as `Command`;
/// `output` is required.
#[proc_macro_derive(Query, attributes(message))]
pub fn derive_query(input: TokenStream) -> TokenStream {
    message::derive_message(input, Kind::Query)
}

/// Derive macro for the `DomainEvent` trait.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, DomainEvent)]
/// #[message(name = "OrderCreated")]
/// struct OrderCreated {
///     pub order_id: String,
/// }
/// ```
///
/// Events always have `()` as output; `output = ...` is rejected.
#[proc_macro_derive(DomainEvent, attributes(message))]
pub fn derive_domain_event(input: TokenStream) -> TokenStream {
    message::derive_message(input, Kind::Event)
}

// ============================================================================
// #[derive(Record)] derive macro
// ============================================================================

/// Derive macro for the `Record` trait (rows staged on a unit of work).
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Record)]
/// #[record(table = "orders")]
/// struct Order {
///     #[record(id)]
///     pub id: String,
///     pub customer_id: String,
/// }
/// ```
///
/// - `#[record(table = "...")]` sets the table name.
///   If omitted, defaults to snake_case struct name + "s".
/// - `#[record(id)]` marks the key field. The field must implement `Display`.
///   If omitted, defaults to a field named `id`.
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    record::derive_record(input)
}
