//! Namespace resource floors from LimitRange objects

use k8s_openapi::api::core::v1::LimitRange;
use tracing::warn;

use crate::quantity::Quantity;

/// LimitRange item type whose minimums apply to containers
pub const LIMIT_TYPE_CONTAINER: &str = "Container";

/// Smallest `min` for `resource` across every Container-type limit item
///
/// Returns `None` when no LimitRange sets a minimum for the resource. When
/// several do, the lowest wins; on ties the earliest is kept. Minimums that
/// fail to parse are skipped.
pub fn min_resource_limits<'a, I>(limit_ranges: I, resource: &str) -> Option<Quantity>
where
    I: IntoIterator<Item = &'a LimitRange>,
{
    let mut floor: Option<Quantity> = None;

    let items = limit_ranges
        .into_iter()
        .filter_map(|lr| lr.spec.as_ref())
        .flat_map(|spec| spec.limits.iter())
        .filter(|item| item.type_ == LIMIT_TYPE_CONTAINER);

    for item in items {
        let Some(min) = item.min.as_ref().and_then(|m| m.get(resource)) else {
            continue;
        };
        let min = match Quantity::try_from(min) {
            Ok(q) => q,
            Err(e) => {
                warn!(resource, error = %e, "Ignoring unparseable LimitRange minimum");
                continue;
            }
        };
        match &floor {
            Some(current) if *current <= min => {}
            _ => floor = Some(min),
        }
    }

    floor
}
