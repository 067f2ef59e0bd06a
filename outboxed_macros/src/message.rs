use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, Type};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Command,
    Query,
    Event,
}

struct MessageArgs {
    name: Option<LitStr>,
    output: Option<Type>,
}

pub fn derive_message(input: TokenStream, kind: Kind) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);

    match expand(&input, kind) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput, kind: Kind) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let args = parse_args(input)?;

    let message_name = args
        .name
        .map(|lit| lit.value())
        .unwrap_or_else(|| name.to_string());

    let output = match (kind, args.output) {
        (Kind::Event, Some(ty)) => {
            return Err(syn::Error::new_spanned(
                ty,
                "domain events always produce `()`; remove `output`",
            ))
        }
        (Kind::Query, None) => {
            return Err(syn::Error::new_spanned(
                name,
                "Query derive requires #[message(output = Type)]",
            ))
        }
        (_, Some(ty)) => quote! { #ty },
        (_, None) => quote! { () },
    };

    let (kind_variant, marker) = match kind {
        Kind::Command => (quote! { Command }, quote! { ::outboxed::Command }),
        Kind::Query => (quote! { Query }, quote! { ::outboxed::Query }),
        Kind::Event => (quote! { Event }, quote! { ::outboxed::DomainEvent }),
    };

    Ok(quote! {
        impl #impl_generics ::outboxed::Message for #name #ty_generics #where_clause {
            const NAME: &'static str = #message_name;
            const KIND: ::outboxed::MessageKind = ::outboxed::MessageKind::#kind_variant;
            type Output = #output;
        }

        impl #impl_generics #marker for #name #ty_generics #where_clause {}
    })
}

fn parse_args(input: &DeriveInput) -> syn::Result<MessageArgs> {
    let mut args = MessageArgs {
        name: None,
        output: None,
    };

    for attr in &input.attrs {
        if !attr.path().is_ident("message") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                args.name = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("output") {
                args.output = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"` or `output = Type`"))
            }
        })?;
    }

    Ok(args)
}
