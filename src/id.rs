//! Code for handling IDs
use anyhow::{Result, ensure};
use indexmap::IndexMap;

/// A trait alias for ID types
pub trait IDLike:
    Eq + std::hash::Hash + std::borrow::Borrow<str> + Clone + std::fmt::Display + From<String>
{
}
impl<T> IDLike for T where
    T: Eq + std::hash::Hash + std::borrow::Borrow<str> + Clone + std::fmt::Display + From<String>
{
}

macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(
            Clone,
            std::hash::Hash,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            serde::Deserialize,
            Debug,
            serde::Serialize,
        )]
        /// An ID type (e.g. `TechnologyID`, `MarketNodeID`, etc.)
        pub struct $name(pub std::rc::Rc<str>);

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(std::rc::Rc::from(s))
            }
        }

        impl $name {
            /// Create a new ID from a string slice
            pub fn new(id: &str) -> Self {
                $name(std::rc::Rc::from(id))
            }
        }
    };
}
pub(crate) use define_id_type;

#[cfg(test)]
define_id_type!(GenericID);

/// Indicates that the struct has an ID field
pub trait HasID<ID: IDLike> {
    /// Get the struct's ID
    fn get_id(&self) -> &ID;
}

/// Implement the `HasID` trait for the given type, assuming it has a field called `id`
macro_rules! define_id_getter {
    ($t:ty, $id_ty:ty) => {
        impl crate::id::HasID<$id_ty> for $t {
            fn get_id(&self) -> &$id_ty {
                &self.id
            }
        }
    };
}
pub(crate) use define_id_getter;

/// Collect items into a map keyed by their IDs, failing on duplicates
pub fn map_by_id<ID, T, I>(items: I) -> Result<IndexMap<ID, T>>
where
    ID: IDLike,
    T: HasID<ID>,
    I: IntoIterator<Item = T>,
{
    let mut map = IndexMap::new();
    for item in items {
        let id = item.get_id().clone();
        ensure!(!map.contains_key(&id), "Duplicate ID {id} found");
        map.insert(id, item);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;

    #[derive(Debug)]
    struct Item {
        id: GenericID,
    }
    define_id_getter! {Item, GenericID}

    #[test]
    fn map_by_id_ok() {
        let map = map_by_id(["a", "b"].map(|id| Item { id: id.into() })).unwrap();
        assert_eq!(map.keys().map(|id| id.0.as_ref()).collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn map_by_id_duplicate() {
        let result = map_by_id(["a", "a"].map(|id| Item { id: id.into() }));
        assert_error!(result, "Duplicate ID a found");
    }
}
