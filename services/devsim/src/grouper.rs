//! Schedule grouping
//!
//! Partitions an element's recurring attributes by effective schedule: the
//! attribute's own schedule, else the element's. Each group becomes one job.

use crate::config::Attribute;
use crate::expander::Element;

/// Attributes of one element sharing one schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleGroup {
    pub schedule: String,
    pub attributes: Vec<Attribute>,
}

/// Group an element's attributes by effective schedule, in order of first appearance
///
/// An element with only static attributes yields one empty group on its own
/// schedule. An element without attributes, or whose attributes have no
/// effective schedule, yields no group for them.
pub fn group(element: &Element) -> Vec<ScheduleGroup> {
    let mut groups: Vec<ScheduleGroup> = Vec::new();
    let recurring = element.recurring_attributes();

    if recurring.is_empty() {
        if let (false, Some(schedule)) = (element.static_attributes().is_empty(), element.schedule()) {
            groups.push(ScheduleGroup {
                schedule: schedule.to_string(),
                attributes: Vec::new(),
            });
        }
        return groups;
    }

    for attribute in recurring {
        let Some(schedule) = attribute.schedule.as_deref().or(element.schedule()) else {
            continue;
        };
        match groups.iter_mut().find(|g| g.schedule == schedule) {
            Some(group) => group.attributes.push(attribute.clone()),
            None => groups.push(ScheduleGroup {
                schedule: schedule.to_string(),
                attributes: vec![attribute.clone()],
            }),
        }
    }

    groups
}
