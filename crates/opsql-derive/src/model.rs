//! Model derive macro implementation.

use crate::common::syn_types::option_inner;
use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr, Result};

/// Parsed `#[op("tag,flags")]` of one field.
#[derive(Debug, Default, PartialEq, Eq)]
struct OpAttr {
    tag: String,
    primary: bool,
    aggregated: bool,
    nested: bool,
}

impl OpAttr {
    fn parse(lit: &LitStr) -> Result<Self> {
        let raw = lit.value();
        let mut parts = raw.split(',').map(str::trim);

        let tag = parts.next().unwrap_or_default();
        if tag.is_empty() {
            return Err(syn::Error::new_spanned(lit, "op tag must not be empty"));
        }

        let mut attr = OpAttr {
            tag: tag.to_string(),
            ..OpAttr::default()
        };
        for flag in parts {
            match flag {
                "primary" => attr.primary = true,
                "aggregated" => attr.aggregated = true,
                "nested" => attr.nested = true,
                other => {
                    return Err(syn::Error::new_spanned(
                        lit,
                        format!("unknown op flag `{other}`, expected primary, aggregated or nested"),
                    ));
                }
            }
        }
        Ok(attr)
    }
}

fn op_attr(field: &syn::Field) -> Result<Option<OpAttr>> {
    let mut found = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("op") {
            continue;
        }
        if found.is_some() {
            return Err(syn::Error::new_spanned(attr, "duplicate op attribute"));
        }
        let lit: LitStr = attr.parse_args().map_err(|_| {
            syn::Error::new_spanned(attr, "op attribute must be a string literal, e.g. #[op(\"id,primary\")]")
        })?;
        found = Some(OpAttr::parse(&lit)?);
    }
    Ok(found)
}

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Model cannot be derived for generic structs",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Model requires a struct with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Model can only be derived for structs",
            ));
        }
    };

    let mut defs = Vec::new();
    let mut scan_arms = Vec::new();
    let mut value_arms = Vec::new();

    for field in fields {
        let Some(attr) = op_attr(field)? else {
            continue;
        };
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let index = defs.len();
        let ident_str = ident.to_string();
        let tag = &attr.tag;
        let primary = attr.primary;
        let aggregated = attr.aggregated;

        if attr.nested {
            let optional = option_inner(&field.ty);
            let inner_ty = optional.unwrap_or(&field.ty);

            defs.push(quote! {
                ::opsql::model::FieldDef {
                    ident: #ident_str,
                    tag: #tag,
                    primary: #primary,
                    aggregated: #aggregated,
                    nested: ::core::option::Option::Some(
                        <#inner_ty as ::opsql::model::Model>::fields,
                    ),
                }
            });

            if optional.is_some() {
                scan_arms.push(quote! {
                    [#index, rest @ ..] => ::opsql::model::Model::scan_field(
                        self.#ident.get_or_insert_with(::core::default::Default::default),
                        rest,
                        value,
                    ),
                });
                value_arms.push(quote! {
                    [#index, rest @ ..] => match &self.#ident {
                        ::core::option::Option::Some(inner) => {
                            ::opsql::model::Model::field_value(inner, rest)
                        }
                        ::core::option::Option::None => {
                            ::core::option::Option::Some(::opsql::value::Value::Null)
                        }
                    },
                });
            } else {
                scan_arms.push(quote! {
                    [#index, rest @ ..] => ::opsql::model::Model::scan_field(&mut self.#ident, rest, value),
                });
                value_arms.push(quote! {
                    [#index, rest @ ..] => ::opsql::model::Model::field_value(&self.#ident, rest),
                });
            }
            continue;
        }

        defs.push(quote! {
            ::opsql::model::FieldDef {
                ident: #ident_str,
                tag: #tag,
                primary: #primary,
                aggregated: #aggregated,
                nested: ::core::option::Option::None,
            }
        });
        scan_arms.push(quote! {
            [#index] => ::opsql::model::scan_value(&mut self.#ident, value, #tag),
        });
        value_arms.push(quote! {
            [#index] => ::core::option::Option::Some(
                ::opsql::value::ToValue::to_value(&self.#ident),
            ),
        });
    }

    let count = defs.len();
    let name_str = name.to_string();

    Ok(quote! {
        impl ::opsql::model::Model for #name {
            fn fields() -> &'static [::opsql::model::FieldDef] {
                static FIELDS: [::opsql::model::FieldDef; #count] = [#(#defs),*];
                &FIELDS
            }

            fn scan_field(
                &mut self,
                path: &[usize],
                value: ::opsql::value::Value,
            ) -> ::opsql::error::OrmResult<()> {
                match path {
                    #(#scan_arms)*
                    _ => ::core::result::Result::Err(::opsql::model::invalid_path(#name_str, path)),
                }
            }

            fn field_value(&self, path: &[usize]) -> ::core::option::Option<::opsql::value::Value> {
                match path {
                    #(#value_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn type_name() -> &'static str {
                #name_str
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn lit(s: &str) -> LitStr {
        LitStr::new(s, proc_macro2::Span::call_site())
    }

    #[test]
    fn test_parse_flags() {
        let attr = OpAttr::parse(&lit("id, primary")).unwrap();
        assert_eq!(
            attr,
            OpAttr {
                tag: "id".into(),
                primary: true,
                ..OpAttr::default()
            }
        );

        let attr = OpAttr::parse(&lit("roles,nested")).unwrap();
        assert!(attr.nested && !attr.primary);

        let attr = OpAttr::parse(&lit("total,aggregated")).unwrap();
        assert!(attr.aggregated);
    }

    #[test]
    fn test_parse_rejects_bad_attrs() {
        assert!(OpAttr::parse(&lit("")).is_err());
        assert!(OpAttr::parse(&lit("id,unique")).is_err());
    }

    #[test]
    fn test_expand_skips_unannotated() {
        let input: DeriveInput = parse_quote! {
            struct User {
                #[op("id,primary")]
                id: i64,
                cache: Vec<u8>,
                #[op("roles,nested")]
                role: Option<Role>,
            }
        };
        let out = expand(input).unwrap().to_string();
        assert!(out.contains("2usize"));
        assert!(out.contains("get_or_insert_with"));
        assert!(!out.contains("cache"));
    }

    #[test]
    fn test_expand_rejects_shapes() {
        let tuple: DeriveInput = parse_quote!(struct Pair(i64, i64););
        assert!(expand(tuple).is_err());

        let generic: DeriveInput = parse_quote!(struct Wrap<T> { #[op("v")] v: T });
        assert!(expand(generic).is_err());

        let enumeration: DeriveInput = parse_quote!(enum Kind { A, B });
        assert!(expand(enumeration).is_err());

        let not_string: DeriveInput = parse_quote!(struct U { #[op(id)] id: i64 });
        assert!(expand(not_string).is_err());
    }
}
