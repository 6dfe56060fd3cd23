pub mod bgp_globals;
pub mod calicoctl;
pub mod dryrun;
pub mod error;
pub mod node;
pub mod peers;
pub mod pools;
pub mod resources;
pub mod subnet;

#[cfg(test)]
pub(crate) mod fake;

/// What a reconciler did to the datastore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub applied: Vec<String>,
    pub deleted: Vec<String>,
    pub skipped: bool,
}

impl Changes {
    pub fn applied<I>(names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            applied: names.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Nothing was done because the resource type is not managed
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}
