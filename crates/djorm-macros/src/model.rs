//! `#[derive(Model)]` implementation.
//!
//! Generates `impl Model` plus a lazily built `ModelMeta` for a named struct.
//! Every struct field becomes one of:
//!
//! - a scalar column (the default), typed by inference from the Rust type
//! - a forward relation (`foreign_key` / `one_to_one`) on `Option<Box<T>>` or
//!   `Option<T>`, stored in the `{field}_id` column unless `db_column` says
//!   otherwise
//! - a reverse one-to-one (`one_to_one, reverse = "..."`) on `Option<Box<T>>`
//! - a to-many relation (`reverse = "..."` or `many_to_many`) on `Vec<T>`
//! - the annotations map (`annotations`)

use darling::{FromDeriveInput, FromField};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Type};

use crate::string_list::StringList;

/// Struct-level attributes parsed from `#[model(...)]`.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(model), supports(struct_named))]
pub struct ModelOpts {
    pub ident: syn::Ident,
    pub data: darling::ast::Data<(), FieldOpts>,

    /// The database table name; defaults to `"{app}_{model_name_lowercase}"`.
    #[darling(default)]
    pub table: Option<String>,

    /// The application label.
    #[darling(default)]
    pub app: Option<String>,

    /// Default ordering (e.g., `["-created_at", "name"]`).
    #[darling(default)]
    pub ordering: Option<StringList>,

    /// Unique-together groups, each a comma-separated list of field names.
    #[darling(default)]
    pub unique_together: Option<StringList>,

    /// Path of the query crate in generated code; defaults to `::djorm_db`.
    #[darling(default)]
    pub crate_path: Option<syn::Path>,
}

/// Per-field attributes parsed from `#[field(...)]`.
#[derive(Debug, FromField)]
#[darling(attributes(field))]
pub struct FieldOpts {
    pub ident: Option<syn::Ident>,
    pub ty: syn::Type,

    #[darling(default)]
    pub primary_key: bool,

    /// Database-generated on insert.
    #[darling(default)]
    pub auto: bool,

    #[darling(default)]
    pub null: bool,

    #[darling(default)]
    pub unique: bool,

    #[darling(default)]
    pub max_length: Option<usize>,

    /// Database column name override.
    #[darling(default)]
    pub db_column: Option<String>,

    #[darling(default)]
    pub foreign_key: bool,

    #[darling(default)]
    pub one_to_one: bool,

    /// The foreign-key field on the target that points back here.
    #[darling(default)]
    pub reverse: Option<String>,

    #[darling(default)]
    pub many_to_many: bool,

    /// Explicit junction model of a many-to-many relation.
    #[darling(default)]
    pub through: Option<syn::Path>,

    /// Junction field pointing at this model.
    #[darling(default)]
    pub source: Option<String>,

    /// Junction field pointing at the target model.
    #[darling(default)]
    pub target: Option<String>,

    #[darling(default)]
    pub on_delete: Option<String>,

    #[darling(default)]
    pub on_update: Option<String>,

    /// Marks the `Annotations` map that receives computed values.
    #[darling(default)]
    pub annotations: bool,
}

/// What a struct field maps to.
enum Kind {
    Scalar,
    Forward { target: Type, boxed: bool },
    ReverseOne { target: Type, boxed: bool, related: String },
    ToMany { target: Type },
    Annotations,
}

struct Field<'a> {
    ident: &'a syn::Ident,
    name: String,
    opts: &'a FieldOpts,
    kind: Kind,
}

/// Generates the `Model` trait implementation for the given derive input.
pub fn derive_model_impl(input: DeriveInput) -> TokenStream {
    match expand(&input) {
        Ok(tokens) => tokens,
        Err(e) => e.write_errors(),
    }
}

fn expand(input: &DeriveInput) -> darling::Result<TokenStream> {
    let opts = ModelOpts::from_derive_input(input)?;
    let krate = opts
        .crate_path
        .clone()
        .unwrap_or_else(|| syn::parse_quote!(::djorm_db));

    let struct_name = &opts.ident;
    let model_name = struct_name.to_string().to_lowercase();
    let app_label = opts.app.as_deref().unwrap_or("app");
    let table = opts
        .table
        .clone()
        .unwrap_or_else(|| format!("{app_label}_{model_name}"));

    let raw_fields = opts
        .data
        .as_ref()
        .take_struct()
        .ok_or_else(|| darling::Error::unsupported_shape("only named structs can derive Model"))?
        .fields;

    let mut errors = darling::Error::accumulator();
    let fields: Vec<Field<'_>> = raw_fields
        .into_iter()
        .filter_map(|f| errors.handle(classify(f)))
        .collect();
    errors.finish()?;

    let ordering: Vec<String> = opts
        .ordering
        .as_ref()
        .map(StringList::values)
        .unwrap_or_default();
    let unique_together: Vec<TokenStream> = match &opts.unique_together {
        Some(list) => list
            .groups()?
            .iter()
            .map(|names| quote! { vec![#(#names),*] })
            .collect(),
        None => Vec::new(),
    };

    let field_defs = fields
        .iter()
        .filter(|f| !matches!(f.kind, Kind::Annotations))
        .map(|f| field_def(f, &krate))
        .collect::<darling::Result<Vec<_>>>()?;

    let unknown = quote! { Err(#krate::OrmError::unknown_field(#table, field)) };
    let methods = Methods::generate(&fields, &krate);
    let Methods {
        get_value,
        set_value,
        related,
        related_mut,
        set_related,
        related_many,
        related_many_mut,
        push_related,
        annotations,
    } = methods;

    Ok(quote! {
        const _: () = {
            use #krate::model::Model as _;

            #[automatically_derived]
            #[allow(unused_variables, unreachable_code, clippy::all, clippy::pedantic, clippy::nursery)]
            impl #krate::model::Model for #struct_name {
                fn meta() -> &'static #krate::model::ModelMeta {
                    static META: ::std::sync::LazyLock<#krate::model::ModelMeta> =
                        ::std::sync::LazyLock::new(|| #krate::model::ModelMeta {
                            app_label: #app_label,
                            model_name: #model_name,
                            db_table: #table,
                            fields: vec![#(#field_defs),*],
                            unique_together: vec![#(#unique_together),*],
                            ordering: vec![#(#ordering),*],
                            factory: || ::std::boxed::Box::new(<#struct_name as ::std::default::Default>::default()),
                        });
                    &META
                }

                fn definitions(&self) -> &'static #krate::model::ModelMeta {
                    <Self as #krate::model::Model>::meta()
                }

                fn get_value(&self, field: &str) -> #krate::OrmResult<#krate::Value> {
                    match field {
                        #(#get_value)*
                        _ => #unknown,
                    }
                }

                fn set_value(&mut self, field: &str, value: #krate::Value) -> #krate::OrmResult<()> {
                    match field {
                        #(#set_value)*
                        _ => return #unknown,
                    }
                    Ok(())
                }

                fn related(&self, field: &str) -> #krate::OrmResult<Option<&dyn #krate::model::Model>> {
                    match field {
                        #(#related)*
                        _ => #unknown,
                    }
                }

                fn related_mut(&mut self, field: &str) -> #krate::OrmResult<Option<&mut dyn #krate::model::Model>> {
                    match field {
                        #(#related_mut)*
                        _ => #unknown,
                    }
                }

                fn set_related(
                    &mut self,
                    field: &str,
                    related: Option<Box<dyn #krate::model::Model>>,
                ) -> #krate::OrmResult<()> {
                    match field {
                        #(#set_related)*
                        _ => return #unknown,
                    }
                    Ok(())
                }

                fn related_many(&self, field: &str) -> #krate::OrmResult<Vec<&dyn #krate::model::Model>> {
                    match field {
                        #(#related_many)*
                        _ => #unknown,
                    }
                }

                fn related_many_mut(&mut self, field: &str) -> #krate::OrmResult<Vec<&mut dyn #krate::model::Model>> {
                    match field {
                        #(#related_many_mut)*
                        _ => #unknown,
                    }
                }

                fn push_related(
                    &mut self,
                    field: &str,
                    related: Box<dyn #krate::model::Model>,
                ) -> #krate::OrmResult<()> {
                    match field {
                        #(#push_related)*
                        _ => return #unknown,
                    }
                    Ok(())
                }

                #annotations
            }
        };
    })
}

fn classify(f: &FieldOpts) -> darling::Result<Field<'_>> {
    let ident = f
        .ident
        .as_ref()
        .ok_or_else(|| darling::Error::unsupported_shape("tuple field"))?;
    let name = ident.to_string();
    let err = |msg: &str| Err(darling::Error::custom(msg).with_span(ident));

    let kind = if f.annotations {
        Kind::Annotations
    } else if f.many_to_many {
        let Some(target) = generic_inner(&f.ty, "Vec") else {
            return err("many_to_many fields must be Vec<T>");
        };
        if f.through.is_some() && (f.source.is_none() || f.target.is_none()) {
            return err("`through` needs both `source` and `target`");
        }
        Kind::ToMany {
            target: target.clone(),
        }
    } else if let Some(related) = &f.reverse {
        if f.one_to_one {
            let Some((target, boxed)) = optional_target(&f.ty) else {
                return err("reverse one_to_one fields must be Option<Box<T>> or Option<T>");
            };
            Kind::ReverseOne {
                target,
                boxed,
                related: related.clone(),
            }
        } else {
            let Some(target) = generic_inner(&f.ty, "Vec") else {
                return err("reverse foreign keys must be Vec<T>");
            };
            Kind::ToMany {
                target: target.clone(),
            }
        }
    } else if f.foreign_key || f.one_to_one {
        let Some((target, boxed)) = optional_target(&f.ty) else {
            return err("relation fields must be Option<Box<T>> or Option<T>");
        };
        Kind::Forward { target, boxed }
    } else {
        Kind::Scalar
    };

    Ok(Field {
        ident,
        name,
        opts: f,
        kind,
    })
}

fn referential_action(krate: &syn::Path, action: Option<&str>) -> darling::Result<TokenStream> {
    let Some(action) = action else {
        return Ok(quote! { #krate::fields::OnDelete::DoNothing });
    };
    let variant = match action.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
        "cascade" => quote! { Cascade },
        "protect" => quote! { Protect },
        "set_null" => quote! { SetNull },
        "set_default" => quote! { SetDefault },
        "restrict" => quote! { Restrict },
        "do_nothing" | "no_action" => quote! { DoNothing },
        other => {
            return Err(darling::Error::unknown_value(other));
        }
    };
    Ok(quote! { #krate::fields::OnDelete::#variant })
}

/// Generates a `FieldDef` construction expression for one field.
fn field_def(f: &Field<'_>, krate: &syn::Path) -> darling::Result<TokenStream> {
    let name = &f.name;
    let o = f.opts;
    let ft = quote! { #krate::fields::FieldType };

    let mut chain = Vec::new();
    if o.primary_key {
        chain.push(quote! { .primary_key() });
    }
    if o.unique {
        chain.push(quote! { .unique() });
    }
    if o.auto {
        chain.push(quote! { .auto() });
    }
    if let Some(ml) = o.max_length {
        chain.push(quote! { .max_length(#ml) });
    }

    let base = match &f.kind {
        Kind::Scalar => {
            if o.null || generic_inner(&o.ty, "Option").is_some() {
                chain.push(quote! { .nullable() });
            }
            if let Some(col) = &o.db_column {
                chain.push(quote! { .column(#col) });
            }
            let field_type = infer_field_type(o, krate);
            quote! { #krate::fields::FieldDef::new(#name, #field_type) }
        }
        Kind::Forward { target, .. } => {
            if o.null {
                chain.push(quote! { .nullable() });
            }
            let column = o.db_column.clone().unwrap_or_else(|| format!("{name}_id"));
            let on_delete = referential_action(krate, o.on_delete.as_deref())?;
            let on_update = referential_action(krate, o.on_update.as_deref())?;
            let (field_type, ctor) = if o.one_to_one {
                (quote! { #ft::OneToOneField }, quote! { one_to_one })
            } else {
                (quote! { #ft::ForeignKey }, quote! { many_to_one })
            };
            quote! {
                #krate::fields::FieldDef::new(#name, #field_type)
                    .column(#column)
                    .relation(
                        #krate::fields::Relation::#ctor(<#target as #krate::model::Model>::meta)
                            .on_delete(#on_delete)
                            .on_update(#on_update),
                    )
            }
        }
        Kind::ReverseOne {
            target, related, ..
        } => quote! {
            #krate::fields::FieldDef::new(#name, #ft::OneToOneField).relation(
                #krate::fields::Relation::one_to_one(<#target as #krate::model::Model>::meta)
                    .reverse(#related),
            )
        },
        Kind::ToMany { target } if o.many_to_many => {
            let through = match (&o.through, &o.source, &o.target) {
                (Some(model), Some(source), Some(target_field)) => quote! {
                    .through(#krate::fields::Through {
                        model: <#model as #krate::model::Model>::meta,
                        source_field: #source,
                        target_field: #target_field,
                    })
                },
                _ => quote! {},
            };
            quote! {
                #krate::fields::FieldDef::new(#name, #ft::ManyToManyField).relation(
                    #krate::fields::Relation::many_to_many(<#target as #krate::model::Model>::meta)
                        #through,
                )
            }
        }
        Kind::ToMany { target } => {
            let related = o.reverse.clone().unwrap_or_default();
            quote! {
                #krate::fields::FieldDef::new(#name, #ft::ReverseForeignKey).relation(
                    #krate::fields::Relation::one_to_many(
                        <#target as #krate::model::Model>::meta,
                        #related,
                    ),
                )
            }
        }
        Kind::Annotations => {
            return Err(darling::Error::custom("the annotations map has no column"));
        }
    };

    Ok(quote! { #base #(#chain)* })
}

/// Match arms of each generated trait method.
struct Methods {
    get_value: Vec<TokenStream>,
    set_value: Vec<TokenStream>,
    related: Vec<TokenStream>,
    related_mut: Vec<TokenStream>,
    set_related: Vec<TokenStream>,
    related_many: Vec<TokenStream>,
    related_many_mut: Vec<TokenStream>,
    push_related: Vec<TokenStream>,
    annotations: TokenStream,
}

impl Methods {
    fn generate(fields: &[Field<'_>], krate: &syn::Path) -> Self {
        let mut m = Self {
            get_value: Vec::new(),
            set_value: Vec::new(),
            related: Vec::new(),
            related_mut: Vec::new(),
            set_related: Vec::new(),
            related_many: Vec::new(),
            related_many_mut: Vec::new(),
            push_related: Vec::new(),
            annotations: TokenStream::new(),
        };
        let model = quote! { #krate::model::Model };

        for f in fields {
            let ident = f.ident;
            let name = &f.name;
            match &f.kind {
                Kind::Scalar => {
                    m.get_value.push(quote! {
                        #name => Ok(#krate::Value::from(self.#ident.clone())),
                    });
                    m.set_value.push(quote! {
                        #name => self.#ident = #krate::value::from_value_or_default(&value)?,
                    });
                }
                Kind::Forward { target, boxed } => {
                    m.get_value.push(quote! {
                        #name => self.#ident.as_ref().map_or(Ok(#krate::Value::Null), |r| r.pk_value()),
                    });
                    m.set_value.push(quote! {
                        #name => {
                            if value.is_null() {
                                self.#ident = None;
                            } else {
                                self.#ident
                                    .get_or_insert_with(::std::default::Default::default)
                                    .set_pk_value(value)?;
                            }
                        }
                    });
                    m.push_single(name, ident, target, *boxed, &model);
                }
                Kind::ReverseOne { target, boxed, .. } => {
                    m.push_single(name, ident, target, *boxed, &model);
                }
                Kind::ToMany { target } => {
                    m.related_many.push(quote! {
                        #name => Ok(self.#ident.iter().map(|r| r as &dyn #model).collect()),
                    });
                    m.related_many_mut.push(quote! {
                        #name => Ok(self.#ident.iter_mut().map(|r| r as &mut dyn #model).collect()),
                    });
                    m.push_related.push(quote! {
                        #name => self.#ident.push(related.downcast::<#target>()?),
                    });
                }
                Kind::Annotations => {
                    m.annotations = quote! {
                        fn set_annotation(&mut self, alias: &str, value: #krate::Value) -> #krate::OrmResult<()> {
                            self.#ident.insert(alias.to_string(), value);
                            Ok(())
                        }

                        fn annotation(&self, alias: &str) -> Option<&#krate::Value> {
                            self.#ident.get(alias)
                        }
                    };
                }
            }
        }
        m
    }

    fn push_single(
        &mut self,
        name: &str,
        ident: &syn::Ident,
        target: &Type,
        boxed: bool,
        model: &TokenStream,
    ) {
        if boxed {
            self.related.push(quote! {
                #name => Ok(self.#ident.as_deref().map(|r| r as &dyn #model)),
            });
            self.related_mut.push(quote! {
                #name => Ok(self.#ident.as_deref_mut().map(|r| r as &mut dyn #model)),
            });
            self.set_related.push(quote! {
                #name => {
                    self.#ident = related
                        .map(|r| r.downcast::<#target>())
                        .transpose()?
                        .map(::std::boxed::Box::new);
                }
            });
        } else {
            self.related.push(quote! {
                #name => Ok(self.#ident.as_ref().map(|r| r as &dyn #model)),
            });
            self.related_mut.push(quote! {
                #name => Ok(self.#ident.as_mut().map(|r| r as &mut dyn #model)),
            });
            self.set_related.push(quote! {
                #name => {
                    self.#ident = related.map(|r| r.downcast::<#target>()).transpose()?;
                }
            });
        }
    }
}

/// Infers the `FieldType` variant of a scalar from the Rust type.
fn infer_field_type(f: &FieldOpts, krate: &syn::Path) -> TokenStream {
    let inner_type = generic_inner(&f.ty, "Option").unwrap_or(&f.ty);
    let type_str = type_to_string(inner_type);
    let ft = quote! { #krate::fields::FieldType };

    if f.auto {
        return if type_str == "i64" {
            quote! { #ft::BigAutoField }
        } else {
            quote! { #ft::AutoField }
        };
    }

    match type_str.as_str() {
        "i32" | "u32" => quote! { #ft::IntegerField },
        "i16" => quote! { #ft::SmallIntegerField },
        "i64" => quote! { #ft::BigIntegerField },
        "f64" | "f32" => quote! { #ft::FloatField },
        "bool" => quote! { #ft::BooleanField },
        "String" if f.max_length.is_some() => quote! { #ft::CharField },
        "String" => quote! { #ft::TextField },
        _ => {
            if type_str.contains("NaiveDateTime") {
                quote! { #ft::DateTimeField }
            } else if type_str.contains("DateTime") {
                quote! { #ft::DateTimeTzField }
            } else if type_str.contains("NaiveDate") {
                quote! { #ft::DateField }
            } else if type_str.contains("NaiveTime") {
                quote! { #ft::TimeField }
            } else if type_str.contains("Duration") {
                quote! { #ft::DurationField }
            } else if type_str.contains("Uuid") {
                quote! { #ft::UuidField }
            } else if type_str.contains("serde_json") {
                quote! { #ft::JsonField }
            } else if type_str.contains("Vec") && type_str.contains("u8") {
                quote! { #ft::BinaryField }
            } else {
                quote! { #ft::TextField }
            }
        }
    }
}

/// If `ty` is `Wrapper<T>` (matching on the last path segment), returns `&T`.
pub(crate) fn generic_inner<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(args) => match args.args.first() {
            Some(syn::GenericArgument::Type(inner)) => Some(inner),
            _ => None,
        },
        _ => None,
    }
}

/// `Option<Box<T>>` gives `(T, true)`; `Option<T>` gives `(T, false)`.
fn optional_target(ty: &Type) -> Option<(Type, bool)> {
    let inner = generic_inner(ty, "Option")?;
    Some(match generic_inner(inner, "Box") {
        Some(target) => (target.clone(), true),
        None => (inner.clone(), false),
    })
}

/// Converts a `syn::Type` to a string for matching.
pub(crate) fn type_to_string(ty: &Type) -> String {
    quote!(#ty).to_string()
}
