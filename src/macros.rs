//! Macros for declaring stages.
//!
//! - `simple_stage!`: implement [`SimpleStage`](crate::SimpleStage) from a closure-like body
//! - `full_stage!`: implement [`FullStage`](crate::FullStage) from a body and a wrapper

/// Implement [`SimpleStage`](crate::SimpleStage) for an existing type.
///
/// # Example
///
/// ```
/// use topdown_chain::simple_stage;
///
/// struct Greet(String);
///
/// simple_stage!(Greet => String, |this, _chain| {
///     Ok(format!("hello {}", this.0))
/// });
/// ```
#[macro_export]
macro_rules! simple_stage {
    (
        $stage:ty => $output:ty,
        |$this:ident, $chain:ident| $invoke:block
    ) => {
        impl $crate::SimpleStage for $stage {
            type Output = $output;

            #[allow(unused_variables)]
            fn invoke(&self, $chain: &mut $crate::Chain) -> $crate::StageResult<$output> {
                let $this = self;
                $invoke
            }
        }
    };
}

/// Implement [`FullStage`](crate::FullStage) for an existing type.
///
/// The wrapper receives the body's outcome as a `Result<Body, Failure>`.
///
/// # Example
///
/// ```
/// use topdown_chain::full_stage;
///
/// struct Fetch;
///
/// full_stage!(Fetch => u32 => u32,
///     body |this, _chain| { Ok(7) },
///     invoke |this, body, _chain| { Ok(body.unwrap_or(0)) }
/// );
/// ```
#[macro_export]
macro_rules! full_stage {
    (
        $stage:ty => $body_ty:ty => $output:ty,
        body |$this:ident, $chain:ident| $body:block,
        invoke |$wthis:ident, $outcome:ident, $wchain:ident| $invoke:block $(,)?
    ) => {
        impl $crate::FullStage for $stage {
            type Body = $body_ty;
            type Output = $output;

            #[allow(unused_variables)]
            fn body(&self, $chain: &mut $crate::Chain) -> $crate::StageResult<$body_ty> {
                let $this = self;
                $body
            }

            #[allow(unused_variables)]
            fn invoke(
                &self,
                $outcome: ::std::result::Result<$body_ty, $crate::Failure>,
                $wchain: &mut $crate::Chain,
            ) -> $crate::StageResult<$output> {
                let $wthis = self;
                $invoke
            }
        }
    };
}
