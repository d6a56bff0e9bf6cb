//! JSON patch of changed container resources
//!
//! Only `resources.limits` and `resources.requests` of init and regular
//! containers are compared. Everything else in the Pod is left out of the
//! patch even if it differs.

use std::collections::BTreeMap;

use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Container, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;

use crate::{Error, Result};

/// Build the patch that turns `original`'s container resources into `mutated`'s
///
/// Container order is preserved; the two Pods must have the same number of
/// init and regular containers.
pub fn diff(original: &Pod, mutated: &Pod) -> Result<Patch> {
    let mut ops = Vec::new();

    match (&original.spec, &mutated.spec) {
        (None, None) => {}
        (Some(before), Some(after)) => {
            diff_containers(
                "initContainers",
                before.init_containers.as_deref().unwrap_or_default(),
                after.init_containers.as_deref().unwrap_or_default(),
                &mut ops,
            )?;
            diff_containers("containers", &before.containers, &after.containers, &mut ops)?;
        }
        _ => return Err(Error::patch("pod spec present on only one side")),
    }

    Ok(Patch(ops))
}

fn diff_containers(
    list: &str,
    before: &[Container],
    after: &[Container],
    ops: &mut Vec<PatchOperation>,
) -> Result<()> {
    if before.len() != after.len() {
        return Err(Error::patch(format!(
            "spec.{list} has {} entries in the original and {} after mutation",
            before.len(),
            after.len()
        )));
    }

    for (index, (b, a)) in before.iter().zip(after).enumerate() {
        let index = index.to_string();
        let base = ["spec", list, index.as_str(), "resources"];
        diff_resources(&base, b.resources.as_ref(), a.resources.as_ref(), ops)?;
    }
    Ok(())
}

fn diff_resources(
    base: &[&str],
    before: Option<&ResourceRequirements>,
    after: Option<&ResourceRequirements>,
    ops: &mut Vec<PatchOperation>,
) -> Result<()> {
    match (before, after) {
        (None, None) => {}
        (None, Some(after)) => ops.push(PatchOperation::Add(AddOperation {
            path: pointer(base, &[]),
            value: serde_json::to_value(after)?,
        })),
        (Some(_), None) => ops.push(PatchOperation::Remove(RemoveOperation {
            path: pointer(base, &[]),
        })),
        (Some(before), Some(after)) => {
            diff_list(base, "limits", before.limits.as_ref(), after.limits.as_ref(), ops)?;
            diff_list(base, "requests", before.requests.as_ref(), after.requests.as_ref(), ops)?;
        }
    }
    Ok(())
}

fn diff_list(
    base: &[&str],
    field: &str,
    before: Option<&BTreeMap<String, KubeQuantity>>,
    after: Option<&BTreeMap<String, KubeQuantity>>,
    ops: &mut Vec<PatchOperation>,
) -> Result<()> {
    match (before, after) {
        (None, None) => {}
        (None, Some(after)) => ops.push(PatchOperation::Add(AddOperation {
            path: pointer(base, &[field]),
            value: serde_json::to_value(after)?,
        })),
        (Some(_), None) => ops.push(PatchOperation::Remove(RemoveOperation {
            path: pointer(base, &[field]),
        })),
        (Some(before), Some(after)) => {
            for (resource, value) in after {
                let path = pointer(base, &[field, resource]);
                match before.get(resource) {
                    None => ops.push(PatchOperation::Add(AddOperation {
                        path,
                        value: serde_json::to_value(value)?,
                    })),
                    Some(old) if old.0 != value.0 => {
                        ops.push(PatchOperation::Replace(ReplaceOperation {
                            path,
                            value: serde_json::to_value(value)?,
                        }))
                    }
                    Some(_) => {}
                }
            }
            for resource in before.keys().filter(|k| !after.contains_key(*k)) {
                ops.push(PatchOperation::Remove(RemoveOperation {
                    path: pointer(base, &[field, resource]),
                }));
            }
        }
    }
    Ok(())
}

fn pointer(base: &[&str], rest: &[&str]) -> PointerBuf {
    PointerBuf::from_tokens(base.iter().chain(rest).copied())
}
