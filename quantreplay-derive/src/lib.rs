extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derives [`NpyDTyped`](../quantreplay/backtest/data/trait.NpyDTyped.html) for a `#[repr(C)]`
/// struct by mapping each field's Rust type to its numpy dtype code.
#[proc_macro_derive(NpyDTyped)]
pub fn dtype_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;

    let mut field_names = Vec::new();
    let mut field_types = Vec::new();

    let expanded = match input.data {
        Data::Struct(ref data_struct) => {
            if let Fields::Named(ref fields_named) = data_struct.fields {
                for field in fields_named.named.iter() {
                    let field_name = field.ident.as_ref().unwrap().to_string();
                    let field_type = field.ty.clone();

                    let ty_str = quote! { #field_type }.to_string();
                    let endianess = if is_little_endian() { "<" } else { ">" };
                    let ty = match ty_str.as_str() {
                        "f64" => "f8",
                        "f32" => "f4",
                        "i64" => "i8",
                        "i32" => "i4",
                        "i16" => "i2",
                        "i8" => "i1",
                        "u64" => "u8",
                        "u32" => "u4",
                        "u16" => "u2",
                        "u8" => "u1",
                        "bool" => "bool",
                        s => panic!("\"{field_name}: {s}\": {s} is unsupported."),
                    };

                    field_names.push(field_name);
                    field_types.push(endianess.to_string() + ty);
                }
            }

            quote! {
                impl crate::backtest::data::NpyDTyped for #name {
                    fn descr() -> Vec<crate::backtest::data::Field> {
                        return vec![
                            #(
                                crate::backtest::data::Field {
                                    name: #field_names.to_string(),
                                    ty: #field_types.to_string(),
                                }
                            ),*
                        ];
                    }
                }
            }
        }
        _ => quote! {
            compile_error!("must be a struct");
        },
    };

    expanded.into()
}

fn is_little_endian() -> bool {
    let n: u32 = 1;
    if n.to_be() == n {
        false
    } else if n.to_le() == n {
        true
    } else {
        panic!();
    }
}
