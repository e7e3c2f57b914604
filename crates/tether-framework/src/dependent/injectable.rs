//! Blanket [`Injectable`] implementations for async functions.

use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::{Param, Resolved};
use crate::error::Interrupt;
use crate::handler::Returns;
use crate::extractor::FromParam;

/// An async callable whose parameters are all [`FromParam`] types.
///
/// Implemented for `async fn`s and closures returning futures with up to 16
/// parameters. `T` is the tuple of parameter types and `R` the value the
/// engine expects back (see [`Returns`]).
pub trait Injectable<T, R>: Clone + Send + Sync + 'static {
    /// The declared parameters, in call order.
    fn params() -> Vec<Param>;

    /// Calls the function with resolved parameters.
    ///
    /// A parameter whose resolved value does not fit its type skips the call.
    fn invoke(&self, args: Vec<Resolved>) -> BoxFuture<'static, Result<R, Interrupt>>;
}

macro_rules! impl_injectable {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, Fut, Res, R, $($ty,)*> Injectable<($($ty,)*), R> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: Returns<R> + 'static,
            R: Send + 'static,
            $( $ty: FromParam, )*
        {
            fn params() -> Vec<Param> {
                vec![$( <$ty as FromParam>::param(), )*]
            }

            fn invoke(&self, args: Vec<Resolved>) -> BoxFuture<'static, Result<R, Interrupt>> {
                let f = self.clone();
                async move {
                    let mut args = args.into_iter();
                    $(
                        let Some($ty) = args.next().and_then(<$ty as FromParam>::from_resolved) else {
                            return Err(Interrupt::Skip);
                        };
                    )*
                    Returns::<R>::into_result(f($($ty,)*).await)
                }
                .boxed()
            }
        }
    };
}

impl_injectable!();
impl_injectable!(T1);
impl_injectable!(T1, T2);
impl_injectable!(T1, T2, T3);
impl_injectable!(T1, T2, T3, T4);
impl_injectable!(T1, T2, T3, T4, T5);
impl_injectable!(T1, T2, T3, T4, T5, T6);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14);
impl_injectable!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15
);
impl_injectable!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15, T16
);
