//! Sub-dependency parameters.

use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

use crate::dependent::{CacheKey, Depends, Param, Resolved};
use crate::extractor::FromParam;

/// A type with a dependency that produces it.
///
/// ```rust,ignore
/// struct Profile { nickname: String }
///
/// async fn load_profile(user: UserId, db: Dep<Database>) -> HandlerResult<Profile> {
///     Ok(db.profile(&user).await?)
/// }
///
/// impl Provide for Profile {
///     fn provider() -> Depends {
///         Depends::new(load_profile)
///     }
/// }
///
/// async fn hello(profile: Dep<Profile>, matcher: Matcher) -> HandlerResult {
///     matcher.send(format!("hello {}", profile.nickname)).await?;
///     Ok(())
/// }
/// ```
///
/// The provider must produce a value of type `Self`; any other value skips
/// the consumer.
pub trait Provide: Any + Send + Sync + Sized {
    fn provider() -> Depends;
}

fn declare<T: Provide>(use_cache: bool) -> Param {
    let provider = T::provider()
        .keyed(CacheKey::of_type::<T>())
        .use_cache(use_cache);
    Param::Depend(Arc::new(provider))
}

fn downcast<T: Provide>(resolved: Resolved) -> Option<Arc<T>> {
    match resolved {
        Resolved::Value(value) => value.downcast::<T>().ok(),
        _ => None,
    }
}

/// The value of `T`'s provider, resolved at most once per scope.
pub struct Dep<T>(Arc<T>);

impl<T> Dep<T> {
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T: Provide> FromParam for Dep<T> {
    fn param() -> Param {
        declare::<T>(true)
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        downcast(resolved).map(Self)
    }
}

impl<T> Deref for Dep<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The value of `T`'s provider, invoked anew on every use.
///
/// The first value produced in a scope is still cached for [`Dep<T>`]
/// consumers.
pub struct Fresh<T>(Arc<T>);

impl<T> Fresh<T> {
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T: Provide> FromParam for Fresh<T> {
    fn param() -> Param {
        declare::<T>(false)
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        downcast(resolved).map(Self)
    }
}

impl<T> Deref for Fresh<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
