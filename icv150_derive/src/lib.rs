use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, LitInt};

#[proc_macro_derive(RegisterSerde)]
/// Derived on a two byte packed_struct to shim in our 16-bit register word conversions
pub fn derive_register_serde(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as DeriveInput);
    let register_name = input.ident;
    let generated = quote! {
        impl Serialize for #register_name {
            fn to_word(&self) -> ::packed_struct::PackingResult<u16> {
                Ok(u16::from_be_bytes(self.pack()?))
            }
        }

        impl Deserialize for #register_name {
            fn from_word(word: u16) -> ::packed_struct::PackingResult<Self> {
                Self::unpack(&word.to_be_bytes())
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro_attribute]
/// Attach a byte offset (within a card's region) to a register type
pub fn address(attr: TokenStream, item: TokenStream) -> TokenStream {
    let offset = parse_macro_input!(attr as LitInt);
    // Registers are 16-bit words in a 4 KiB window, anything wider is a typo
    if let Err(e) = offset.base10_parse::<u16>() {
        return e.to_compile_error().into();
    }
    let item = parse_macro_input!(item as DeriveInput);
    let ident = item.ident.clone();

    let generated = quote! {
        #item

        impl Address for #ident {
            const OFFSET: u16 = #offset;
        }
    };
    TokenStream::from(generated)
}
