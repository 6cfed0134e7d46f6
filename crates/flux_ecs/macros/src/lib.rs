use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, parse_quote, DeriveInput, Generics, Path};

/// Storage classification read from `#[component(..)]`.
#[derive(Default)]
struct ComponentAttrs {
    comparable: bool,
    hashed: bool,
    immutable: bool,
}

impl ComponentAttrs {
    fn parse(input: &DeriveInput) -> syn::Result<Self> {
        let mut attrs = ComponentAttrs::default();
        for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("component")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("comparable") {
                    attrs.comparable = true;
                } else if meta.path.is_ident("hashed") {
                    attrs.hashed = true;
                } else if meta.path.is_ident("immutable") {
                    attrs.immutable = true;
                } else {
                    return Err(meta.error("expected `comparable`, `hashed` or `immutable`"));
                }
                Ok(())
            })?;
        }

        if attrs.immutable && (attrs.comparable || attrs.hashed) {
            return Err(syn::Error::new(
                Span::call_site(),
                "a component cannot be both immutable and comparable",
            ));
        }
        Ok(attrs)
    }
}

/// Every type parameter must be `'static` for the trait impls to hold.
fn static_generics(generics: &Generics) -> Generics {
    let mut generics = generics.clone();
    let params: Vec<_> = generics.type_params().map(|param| param.ident.clone()).collect();
    let where_clause = generics.make_where_clause();
    for ident in params {
        where_clause.predicates.push(parse_quote!(#ident: 'static));
    }
    generics
}

fn marker_impl(input: &DeriveInput, trait_path: Path) -> TokenStream2 {
    let name = &input.ident;
    let generics = static_generics(&input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    quote! {
        impl #impl_generics #trait_path for #name #ty_generics #where_clause {}
    }
}

/// Derives `Component`.
///
/// * `#[component(comparable)]` tracks in-place mutation by comparing against
///   a shadow copy; requires `Clone + PartialEq`.
/// * `#[component(comparable, hashed)]` compares 64-bit hashes instead;
///   requires `Hash`.
/// * `#[component(immutable)]` forbids mutable access.
#[proc_macro_derive(Component, attributes(component))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let attrs = match ComponentAttrs::parse(&input) {
        Ok(attrs) => attrs,
        Err(error) => return error.to_compile_error().into(),
    };

    let name = &input.ident;
    let generics = static_generics(&input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let body = if attrs.immutable {
        quote! {
            const KIND: ::flux_ecs::component::ComponentKind = ::flux_ecs::component::ComponentKind::Immutable;
        }
    } else if attrs.hashed {
        quote! {
            const KIND: ::flux_ecs::component::ComponentKind = ::flux_ecs::component::ComponentKind::Comparable;

            fn change_detection() -> ::flux_ecs::component::ChangeDetection<Self> {
                ::flux_ecs::component::ChangeDetection::hashed()
            }
        }
    } else if attrs.comparable {
        quote! {
            const KIND: ::flux_ecs::component::ComponentKind = ::flux_ecs::component::ComponentKind::Comparable;

            fn change_detection() -> ::flux_ecs::component::ChangeDetection<Self> {
                ::flux_ecs::component::ChangeDetection::shadow()
            }
        }
    } else {
        TokenStream2::new()
    };

    quote! {
        impl #impl_generics ::flux_ecs::component::Component for #name #ty_generics #where_clause {
            #body
        }
    }
    .into()
}

#[proc_macro_derive(Resource)]
pub fn derive_resource(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    marker_impl(&input, parse_quote!(::flux_ecs::resource::Resource)).into()
}

#[proc_macro_derive(Event)]
pub fn derive_event(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    marker_impl(&input, parse_quote!(::flux_ecs::event::Event)).into()
}
