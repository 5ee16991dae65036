//! Authentication state trait and macro.

use crate::db::Database;

/// Trait for state types the authorization gates can read users through.
pub trait HasAuthBackend {
    fn db(&self) -> &Database;
}

/// Implement `HasAuthBackend` for a state struct with a `db: Database` field.
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub db: Database,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
        }
    };
}
