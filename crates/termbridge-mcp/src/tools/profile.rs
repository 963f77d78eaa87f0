//! Tools: profile_list, profile_get, profile_save, profile_delete.

use serde::Deserialize;
use serde_json::json;
use termbridge::Profile;

use super::registry::{RegistryError, Tool, ToolRegistryBuilder};
use super::{parse_args, ToolDeps};

const CATEGORY: &str = "profile";

#[derive(Debug, Deserialize)]
struct NameParams {
    name: String,
}

pub fn register(builder: &mut ToolRegistryBuilder, deps: &ToolDeps) -> Result<(), RegistryError> {
    let profiles = deps.profiles.clone();
    builder.register(Tool::new(
        "profile_list",
        "List saved connection profiles",
        CATEGORY,
        json!({}),
        move |_, _| {
            let profiles = profiles.clone();
            async move {
                let list = profiles.list();
                Ok(json!({ "success": true, "count": list.len(), "profiles": list }))
            }
        },
    ))?;

    let profiles = deps.profiles.clone();
    builder.register(Tool::new(
        "profile_get",
        "Show one connection profile",
        CATEGORY,
        json!({ "name": { "type": "string" } }),
        move |args, _| {
            let profiles = profiles.clone();
            async move {
                let params: NameParams = parse_args(args)?;
                let profile = profiles.get(&params.name)?;
                Ok(json!({ "success": true, "profile": profile }))
            }
        },
    ))?;

    let profiles = deps.profiles.clone();
    builder.register(Tool::new(
        "profile_save",
        "Create or replace a connection profile",
        CATEGORY,
        json!({
            "name": { "type": "string" },
            "host": { "type": "string" },
            "port": { "type": "integer", "description": "Defaults to 22", "optional": true },
            "username": { "type": "string", "optional": true },
            "defaultPath": { "type": "string", "optional": true }
        }),
        move |args, _| {
            let profiles = profiles.clone();
            async move {
                let profile: Profile = parse_args(args)?;
                let name = profile.name.clone();
                let replaced = profiles.save(profile)?;
                Ok(json!({ "success": true, "name": name, "replaced": replaced }))
            }
        },
    ))?;

    let profiles = deps.profiles.clone();
    builder.register(Tool::new(
        "profile_delete",
        "Delete a connection profile",
        CATEGORY,
        json!({ "name": { "type": "string" } }),
        move |args, _| {
            let profiles = profiles.clone();
            async move {
                let params: NameParams = parse_args(args)?;
                let removed = profiles.delete(&params.name)?;
                Ok(json!({ "success": true, "deleted": removed.name }))
            }
        },
    ))?;

    Ok(())
}
