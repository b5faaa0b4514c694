use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::index::IndexDescriptor;

/// A stored entity type.
///
/// A model names its collection and may declare the indexes that collection
/// should carry. Its field layout is whatever its serde implementation says.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     #[serde(rename = "_id")]
///     id: String,
///     email: String,
/// }
///
/// impl Model for User {
///     fn collection_name() -> &'static str {
///         "users"
///     }
///
///     fn indexes() -> Vec<IndexDescriptor> {
///         vec![IndexDescriptor::new("email_unique").ascending("email").unique()]
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection the model lives in. Must be stable for the process lifetime.
    fn collection_name() -> &'static str;

    /// Desired index set for the collection
    fn indexes() -> Vec<IndexDescriptor> {
        Vec::new()
    }
}
