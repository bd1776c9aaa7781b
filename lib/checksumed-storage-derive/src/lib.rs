use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, parse_macro_input, spanned::Spanned};

/// Convert CamelCase to snake_case
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);

    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Check if a field has a specific attribute
fn has_attr(field: &syn::Field, attr_name: &str) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident(attr_name))
}

/// Flags parsed from #[column(...)]
#[derive(Default)]
struct ColumnAttr {
    skip: bool,
    unique: bool,
    index: bool,
}

fn parse_column_attr(field: &syn::Field) -> syn::Result<ColumnAttr> {
    let mut column = ColumnAttr::default();
    for attr in &field.attrs {
        if attr.path().is_ident("column") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    column.skip = true;
                } else if meta.path.is_ident("unique") {
                    column.unique = true;
                } else if meta.path.is_ident("index") {
                    column.index = true;
                } else {
                    return Err(meta.error("expected `skip`, `unique` or `index`"));
                }
                Ok(())
            })?;
        }
    }
    if column.unique && column.index {
        return Err(syn::Error::new(
            field.span(),
            "a column is either `unique` or `index`, not both",
        ));
    }
    Ok(column)
}

/// Parse #[checksum] / #[checksum(unique = false)]. Returns the uniqueness
/// flag, or None when the field is not checksumed.
fn parse_checksum_attr(field: &syn::Field) -> syn::Result<Option<bool>> {
    let mut declared: Option<bool> = None;

    for attr in &field.attrs {
        if !attr.path().is_ident("checksum") {
            continue;
        }
        if declared.is_some() {
            return Err(syn::Error::new(
                attr.span(),
                "attribute is already checksumed",
            ));
        }

        let mut unique = true;
        if matches!(attr.meta, syn::Meta::List(_)) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("unique") {
                    meta.input.parse::<syn::Token![=]>()?;
                    let lit: Lit = meta.input.parse()?;
                    match lit {
                        Lit::Bool(b) => unique = b.value(),
                        other => return Err(syn::Error::new(other.span(), "expected a bool")),
                    }
                    Ok(())
                } else {
                    Err(meta.error("expected `unique = <bool>`"))
                }
            })?;
        }
        declared = Some(unique);
    }

    Ok(declared)
}

/// Parse #[model(table = "...")] attribute and return table name
fn parse_model_attr(input: &DeriveInput) -> syn::Result<Option<String>> {
    for attr in &input.attrs {
        if attr.path().is_ident("model") {
            let mut table_name = None;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("table") {
                    meta.input.parse::<syn::Token![=]>()?;
                    let lit: Lit = meta.input.parse()?;
                    match lit {
                        Lit::Str(s) => table_name = Some(s.value()),
                        other => {
                            return Err(syn::Error::new(other.span(), "expected a string literal"));
                        }
                    }
                    Ok(())
                } else {
                    Err(meta.error("expected `table = \"...\"`"))
                }
            })?;
            return Ok(table_name);
        }
    }
    Ok(None)
}

/// Map a Rust type to a field kind, and whether it is optional
fn rust_type_to_field_kind(ty: &syn::Type) -> (TokenStream2, bool) {
    let type_str = quote::quote!(#ty).to_string();
    // Remove spaces for easier matching
    let type_str = type_str.replace(' ', "");

    // Check for Option<T> - extract inner type
    let (inner_type, optional) = if type_str.starts_with("Option<") && type_str.ends_with('>') {
        (&type_str[7..type_str.len() - 1], true)
    } else {
        (type_str.as_str(), false)
    };

    let kind = match inner_type {
        // Datetime types
        s if s.contains("StorageDatetime") => quote! { Datetime },
        s if s.contains("DateTime") => quote! { Datetime },
        // Integer types
        "u64" | "i64" => quote! { BigInt },
        "u32" | "i32" | "u16" | "i16" | "u8" | "i8" | "usize" | "isize" => quote! { Integer },
        "f64" | "f32" => quote! { Float },
        // Boolean
        "bool" => quote! { Boolean },
        s if s.contains("serde_json::Value") || s.starts_with("Vec<") => quote! { Json },
        // Default to text for String and everything else
        _ => quote! { Text },
    };

    (quote! { checksumed_storage::FieldKind::#kind }, optional)
}

/// Derive macro for the `Model` trait of checksumed-storage.
///
/// Generates `Model::define()`, which builds the model's schema: one field per
/// struct field, a serial key, and a `{field}_checksum` sibling for every field
/// marked `#[checksum]`.
///
/// ## Attributes
///
/// - `#[model(table = "...")]` on the struct: table name (default: snake_case
///   struct name with an `s` suffix)
/// - `#[key]`: the serial key field (default: a field named `id`)
/// - `#[checksum]`: checksum the field, with a unique checksum field
/// - `#[checksum(unique = false)]`: checksum the field, with an indexed checksum field
/// - `#[column(skip)]`: not stored
/// - `#[column(unique)]` / `#[column(index)]`: constraint on the field itself
///
/// Fields of type `Option<T>` are optional; every other field is required.
///
/// ## Example
///
/// ```text
/// #[derive(Serialize, Deserialize, Checksumed)]
/// #[model(table = "urls")]
/// struct Url {
///     #[key]
///     pub id: Option<i64>,
///     #[checksum]
///     pub url: String,
/// }
/// // Use: let repo = ChecksumedRepository::for_model::<Url>(executor)?;
/// ```
#[proc_macro_derive(Checksumed, attributes(model, key, checksum, column))]
pub fn derive_checksumed(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "Checksumed only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "Checksumed only supports structs",
            ));
        }
    };

    let table_name = parse_model_attr(input)?
        .unwrap_or_else(|| format!("{}s", to_snake_case(&name.to_string())));

    let field_names: Vec<String> = fields
        .iter()
        .filter_map(|f| f.ident.as_ref().map(|ident| ident.to_string()))
        .collect();

    let mut key_field: Option<String> = None;
    for field in fields.iter().filter(|f| has_attr(f, "key")) {
        if let Some(existing) = &key_field {
            return Err(syn::Error::new(
                field.span(),
                format!("key already declared on `{}`", existing),
            ));
        }
        key_field = field.ident.as_ref().map(|ident| ident.to_string());
    }
    let key_field = key_field.or_else(|| field_names.iter().find(|f| *f == "id").cloned());

    let mut field_decls = Vec::new();
    let mut checksum_decls = Vec::new();
    let mut checksumed_names = Vec::new();

    for field in fields.iter() {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let field_name = ident.to_string();
        let column = parse_column_attr(field)?;
        let checksum = parse_checksum_attr(field)?;

        if column.skip {
            if checksum.is_some() || has_attr(field, "key") {
                return Err(syn::Error::new(
                    field.span(),
                    "a skipped column cannot be a key or checksumed",
                ));
            }
            continue;
        }

        if key_field.as_deref() == Some(field_name.as_str()) {
            if checksum.is_some() {
                return Err(syn::Error::new(
                    field.span(),
                    "the key cannot be checksumed",
                ));
            }
            continue;
        }

        let (kind, optional) = rust_type_to_field_kind(&field.ty);
        let required = if optional {
            quote! {}
        } else {
            quote! { .required() }
        };
        let constraint = if column.unique {
            quote! { .unique() }
        } else if column.index {
            quote! { .indexed() }
        } else {
            quote! {}
        };

        field_decls.push(quote! {
            let builder = builder.field(
                checksumed_storage::FieldDefinition::new(#field_name, #kind) #required #constraint
            )?;
        });

        if let Some(unique) = checksum {
            let checksum_field = format!("{}_checksum", field_name);
            if field_names.contains(&checksum_field) {
                return Err(syn::Error::new(
                    field.span(),
                    format!(
                        "field `{}` collides with the checksum field of `{}`",
                        checksum_field, field_name
                    ),
                ));
            }
            checksum_decls.push(quote! {
                let builder = builder.checksum(
                    #field_name,
                    checksumed_storage::ChecksumOptions { unique: #unique },
                )?;
            });
            checksumed_names.push(field_name.clone());
        }
    }

    let key_decl = match &key_field {
        Some(key) => quote! { let builder = builder.key(#key); },
        None => quote! {},
    };

    let expanded = quote! {
        impl #name {
            /// Names of the attributes declared `#[checksum]`.
            pub const CHECKSUMED_ATTRIBUTES: &'static [&'static str] = &[#(#checksumed_names),*];
        }

        impl checksumed_storage::Model for #name {
            fn define() -> Result<checksumed_storage::ModelSchema, checksumed_storage::StorageError> {
                let builder = checksumed_storage::SchemaBuilder::new(#table_name);
                #key_decl
                #(#field_decls)*
                #(#checksum_decls)*
                builder.build()
            }
        }
    };

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> DeriveInput {
        syn::parse_str(source).unwrap()
    }

    #[test]
    fn model_table_must_be_a_string() {
        let input = parse("#[model(table = 123)] struct Url { id: Option<i64> }");
        let err = parse_model_attr(&input).unwrap_err();
        assert_eq!(err.to_string(), "expected a string literal");
        assert!(expand(&input).is_err());
    }

    #[test]
    fn model_table_defaults_to_plural_snake_case() {
        let input = parse("#[model(table = \"links\")] struct Url { id: Option<i64> }");
        assert_eq!(parse_model_attr(&input).unwrap().as_deref(), Some("links"));

        let input = parse("struct MediaAsset { id: Option<i64> }");
        assert_eq!(parse_model_attr(&input).unwrap(), None);
        assert_eq!(to_snake_case("MediaAsset"), "media_asset");
    }

    #[test]
    fn checksum_name_collision_is_rejected() {
        let input = parse(
            "struct Url { id: Option<i64>, #[checksum] url: String, url_checksum: String }",
        );
        let err = expand(&input).unwrap_err();
        assert!(err.to_string().contains("collides with the checksum field"));
    }
}
