use std::collections::BTreeSet;
use std::fmt;

/// Identifies a transform stage an item has to go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Marker(pub u32);

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "marker {}", self.0)
    }
}

/// Items that carry stage markers.
pub trait Marked {
    fn has_marker(&self, marker: Marker) -> bool;
}

/// The unit of work flowing through a pipeline.
///
/// `number` is unique within a run. `markers` lists the stages that must act
/// on the item; every other stage passes it through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkItem {
    pub number: u64,
    pub markers: BTreeSet<Marker>,
}

impl WorkItem {
    #[must_use]
    pub fn new(number: u64) -> Self {
        Self {
            number,
            markers: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_markers<I>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = Marker>,
    {
        self.markers.extend(markers);
        self
    }

    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains(&marker)
    }
}

impl Marked for WorkItem {
    fn has_marker(&self, marker: Marker) -> bool {
        WorkItem::has_marker(self, marker)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.number)
    }
}
