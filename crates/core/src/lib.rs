//! Pure delivery domain logic.
//!
//! Everything in this crate is free of network access: the data model,
//! the `<entity.field>` template engine, path templates, EXR header
//! inspection, validation, delivery planning, rerender decisions and the
//! CSV manifest codec. Production-database access lives in
//! `delivery-shotgrid`, renderer processes in `delivery-nuke`.

pub mod context;
pub mod entity;
pub mod error;
pub mod events;
pub mod exr;
pub mod field_template;
pub mod footage_format;
pub mod frames;
pub mod manifest;
pub mod nested;
pub mod outputs;
pub mod path_template;
pub mod planning;
pub mod records;
pub mod rerender;
pub mod settings;
pub mod slate;
pub mod types;
pub mod user_settings;
pub mod validation;
pub mod version;
pub mod version_override;
