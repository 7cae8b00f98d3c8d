use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Expr, Fields, Type};

/// Generates `fn from_repr(discriminant) -> Option<Self>` for a fieldless
/// enum whose variants all carry literal discriminants. The discriminant
/// type is taken from the `#[repr(...)]` attribute.
pub fn derive(tokens: proc_macro::TokenStream) -> TokenStream {
	let input: DeriveInput = syn::parse(tokens).expect("FromRepr: unparsable input");

	let Data::Enum(data) = &input.data else {
		panic!("FromRepr only applies to enums");
	};
	assert!(
		input.generics.params.is_empty(),
		"FromRepr does not support generic enums"
	);

	let repr: Type = input.attrs.iter()
		.find(|attr| attr.path().is_ident("repr"))
		.map(|attr| attr.parse_args().expect("FromRepr: unparsable #[repr]"))
		.unwrap_or_else(|| syn::parse_quote!(usize));

	let arms = data.variants.iter().map(|variant| {
		let ident = &variant.ident;
		assert!(
			matches!(variant.fields, Fields::Unit),
			"FromRepr: variant `{ident}` must not carry fields"
		);
		let Some((_, discriminant)) = &variant.discriminant else {
			panic!("FromRepr: variant `{ident}` needs an explicit discriminant");
		};
		assert!(
			matches!(discriminant, Expr::Lit(_)),
			"FromRepr: variant `{ident}` needs a literal discriminant"
		);
		quote!(#discriminant => Some(Self::#ident),)
	});

	let name = &input.ident;
	quote! {
		impl #name {
			/// Maps a raw discriminant back to its variant, or `None` if unassigned.
			pub fn from_repr(discriminant: #repr) -> Option<Self> {
				match discriminant {
					#(#arms)*
					_ => None,
				}
			}
		}
	}
}
