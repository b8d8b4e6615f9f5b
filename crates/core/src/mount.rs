//! Mount host-path resolution
//!
//! Mounts backed by an input get their host directory from that input's
//! resolved value. What the value means depends on the input's type:
//!
//! - `resource`: a serialized resource descriptor; its `directory` is used
//! - `file`: the value is the path
//! - project, subject, session, scan, assessor: an object with a `resources`
//!   list; a lone resource is always used, otherwise the one labeled with the
//!   mount's `resource` selector
//!
//! Mounts without a source input are output mounts and get a build directory
//! at launch instead.

use crate::command::{CommandMount, InputType};
use crate::errors::ResolutionError;
use crate::resolved::ResolvedInput;
use crate::site::ResourceDescriptor;
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WithResources {
    resources: Vec<ResourceDescriptor>,
}

fn mount_error(mount: &CommandMount, message: impl Into<String>) -> ResolutionError {
    ResolutionError::Mount {
        mount: mount.name.clone(),
        message: message.into(),
    }
}

fn directory_of(mount: &CommandMount, resource: &ResourceDescriptor) -> Result<String, ResolutionError> {
    resource.directory.clone().ok_or_else(|| {
        mount_error(
            mount,
            format!(
                "resource {} has no directory",
                resource.label.as_deref().unwrap_or("(unlabeled)")
            ),
        )
    })
}

/// Resolve the host directory for a mount with a source input
#[instrument(skip_all, fields(mount = %mount.name))]
pub fn resolve_host_path(
    mount: &CommandMount,
    inputs: &IndexMap<String, ResolvedInput>,
) -> Result<String, ResolutionError> {
    let source_name = mount
        .source_input
        .as_deref()
        .ok_or_else(|| mount_error(mount, "mount has no source input"))?;
    let source = inputs.get(source_name).ok_or_else(|| {
        mount_error(mount, format!("source input \"{}\" is not declared", source_name))
    })?;
    let value = source.value.as_deref().ok_or_else(|| {
        mount_error(mount, format!("source input \"{}\" resolved to null", source_name))
    })?;

    let path = match source.input_type {
        InputType::File => value.to_string(),
        InputType::Resource => {
            let resource: ResourceDescriptor = serde_json::from_str(value).map_err(|e| {
                mount_error(mount, format!("source input \"{}\" is not a resource: {}", source_name, e))
            })?;
            directory_of(mount, &resource)?
        }
        t if t.is_site_object() => {
            let object: WithResources = serde_json::from_str(value).map_err(|e| {
                mount_error(mount, format!("source input \"{}\" is not a {}: {}", source_name, t, e))
            })?;
            let chosen = match object.resources.as_slice() {
                [] => {
                    return Err(mount_error(
                        mount,
                        format!("{} \"{}\" has no resources", t, source_name),
                    ))
                }
                [only] => only,
                several => several
                    .iter()
                    .find(|r| {
                        mount.resource.is_some() && r.label.as_deref() == mount.resource.as_deref()
                    })
                    .ok_or_else(|| ResolutionError::AmbiguousResource {
                        mount: mount.name.clone(),
                        source_input: source_name.to_string(),
                        selector: mount.resource.clone(),
                    })?,
            };
            directory_of(mount, chosen)?
        }
        other => {
            return Err(mount_error(
                mount,
                format!("inputs of type {} cannot back a mount", other),
            ))
        }
    };

    debug!(host_path = %path, "Resolved mount host path");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mount(source: Option<&str>, resource: Option<&str>) -> CommandMount {
        CommandMount {
            name: "in".to_string(),
            path: "/input".to_string(),
            source_input: source.map(str::to_string),
            resource: resource.map(str::to_string),
            ..Default::default()
        }
    }

    fn inputs(input_type: InputType, value: Option<String>) -> IndexMap<String, ResolvedInput> {
        IndexMap::from([(
            "src".to_string(),
            ResolvedInput {
                name: "src".to_string(),
                input_type,
                value,
                parent: None,
                sensitive: false,
            },
        )])
    }

    #[test]
    fn test_single_resource_used_whatever_the_label() {
        let scan = json!({"id": "1", "resources": [{"label": "NIFTI", "directory": "/data/1/NIFTI"}]});
        let path = resolve_host_path(
            &mount(Some("src"), Some("DICOM")),
            &inputs(InputType::Scan, Some(scan.to_string())),
        )
        .unwrap();
        assert_eq!(path, "/data/1/NIFTI");
    }

    #[test]
    fn test_several_resources_select_by_label() {
        let scan = json!({"resources": [
            {"label": "NIFTI", "directory": "/n"},
            {"label": "DICOM", "directory": "/d"}
        ]});
        let inputs = inputs(InputType::Scan, Some(scan.to_string()));

        let path = resolve_host_path(&mount(Some("src"), Some("DICOM")), &inputs).unwrap();
        assert_eq!(path, "/d");

        let err = resolve_host_path(&mount(Some("src"), Some("SNAPSHOTS")), &inputs).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::AmbiguousResource {
                mount: "in".into(),
                source_input: "src".into(),
                selector: Some("SNAPSHOTS".into())
            }
        );

        let err = resolve_host_path(&mount(Some("src"), None), &inputs).unwrap_err();
        assert!(matches!(err, ResolutionError::AmbiguousResource { selector: None, .. }));
    }

    #[test]
    fn test_empty_resources_fail() {
        let session = json!({"resources": []});
        let err = resolve_host_path(
            &mount(Some("src"), None),
            &inputs(InputType::Session, Some(session.to_string())),
        )
        .unwrap_err();
        assert!(err.to_string().contains("has no resources"));
    }

    #[test]
    fn test_resource_and_file_sources() {
        let resource = json!({"label": "DICOM", "directory": "/archive/DICOM"});
        assert_eq!(
            resolve_host_path(
                &mount(Some("src"), None),
                &inputs(InputType::Resource, Some(resource.to_string()))
            )
            .unwrap(),
            "/archive/DICOM"
        );
        assert_eq!(
            resolve_host_path(
                &mount(Some("src"), None),
                &inputs(InputType::File, Some("/archive/a.dcm".to_string()))
            )
            .unwrap(),
            "/archive/a.dcm"
        );
    }

    #[test]
    fn test_unusable_sources() {
        let no_source = resolve_host_path(&mount(None, None), &IndexMap::new()).unwrap_err();
        assert!(matches!(no_source, ResolutionError::Mount { .. }));

        let undeclared = resolve_host_path(&mount(Some("ghost"), None), &IndexMap::new()).unwrap_err();
        assert!(undeclared.to_string().contains("not declared"));

        let null = resolve_host_path(&mount(Some("src"), None), &inputs(InputType::Scan, None)).unwrap_err();
        assert!(null.to_string().contains("resolved to null"));

        let wrong_type = resolve_host_path(
            &mount(Some("src"), None),
            &inputs(InputType::String, Some("/tmp".to_string())),
        )
        .unwrap_err();
        assert!(wrong_type.to_string().contains("cannot back a mount"));
    }
}
