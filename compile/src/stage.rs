use wavec_session::Options;

use crate::{CompilerResult, CompilerStopped};

/// This trait is implemented by a stage in the compiler
pub trait Stage {
    type Input;
    type Output;

    /// Return false if this stage is disabled by `options`
    fn enabled(&self, _options: &Options) -> bool {
        true
    }

    /// A short name for this stage, used in logs and errors
    fn name(&self) -> &'static str;

    /// Run this stage
    fn run(&mut self, input: Self::Input, options: &Options) -> CompilerResult<Self::Output>;

    fn next<S>(self, stage: S) -> Chain<Self, S>
    where
        Self: Sized,
        S: Stage<Input = Self::Output>,
    {
        Chain::new(self, stage)
    }

    fn next_optional<S>(self, stage: S) -> ChainOptional<Self, S>
    where
        Self: Sized,
        S: Stage<Input = Self::Output, Output = Self::Output>,
    {
        ChainOptional::new(self, stage)
    }
}

impl<I, O> Stage for &mut dyn FnMut(I, &Options) -> CompilerResult<O> {
    type Input = I;
    type Output = O;

    fn name(&self) -> &'static str {
        "custom"
    }

    #[inline]
    fn run(&mut self, input: Self::Input, options: &Options) -> CompilerResult<Self::Output> {
        (*self)(input, options)
    }
}

/// This struct is used to chain multiple [Stage] together
pub struct Chain<A, B> {
    a: A,
    b: B,
}

impl<A, B> Chain<A, B> {
    fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<A, B> Stage for Chain<A, B>
where
    A: Stage,
    B: Stage<Input = <A as Stage>::Output>,
{
    type Input = <A as Stage>::Input;
    type Output = <B as Stage>::Output;

    fn name(&self) -> &'static str {
        self.b.name()
    }

    fn run(&mut self, input: Self::Input, options: &Options) -> CompilerResult<Self::Output> {
        if !self.a.enabled(options) {
            return Err(CompilerStopped(self.a.name()).into());
        }
        let output = self.a.run(input, options)?;
        if !self.b.enabled(options) {
            return Err(CompilerStopped(self.b.name()).into());
        }
        self.b.run(output, options)
    }
}

/// This struct is used to chain two [Stage]s together when the second might be disabled
pub struct ChainOptional<A, B> {
    a: A,
    b: B,
}

impl<A, B> ChainOptional<A, B> {
    fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<A, B> Stage for ChainOptional<A, B>
where
    A: Stage,
    B: Stage<Input = <A as Stage>::Output, Output = <A as Stage>::Output>,
{
    type Input = <A as Stage>::Input;
    type Output = <B as Stage>::Output;

    fn name(&self) -> &'static str {
        self.b.name()
    }

    fn run(&mut self, input: Self::Input, options: &Options) -> CompilerResult<Self::Output> {
        if !self.a.enabled(options) {
            return Err(CompilerStopped(self.a.name()).into());
        }
        let output = self.a.run(input, options)?;
        if !self.b.enabled(options) {
            log::debug!(target: "driver", "skipping disabled stage '{}'", self.b.name());
            Ok(output)
        } else {
            self.b.run(output, options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Add(u32);

    impl Stage for Add {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &'static str {
            "add"
        }

        fn run(&mut self, input: u32, _options: &Options) -> CompilerResult<u32> {
            Ok(input + self.0)
        }
    }

    /// Only enabled when validation is
    struct Double;

    impl Stage for Double {
        type Input = u32;
        type Output = u32;

        fn enabled(&self, options: &Options) -> bool {
            options.validate
        }

        fn name(&self) -> &'static str {
            "double"
        }

        fn run(&mut self, input: u32, _options: &Options) -> CompilerResult<u32> {
            Ok(input * 2)
        }
    }

    #[test]
    fn optional_stages_are_skipped() {
        let enabled = Options::default();
        let disabled = Options::default().with_validation(false);
        assert_eq!(Add(1).next_optional(Double).run(2, &enabled).unwrap(), 6);
        assert_eq!(Add(1).next_optional(Double).run(2, &disabled).unwrap(), 3);
    }

    #[test]
    fn disabled_stages_stop_a_chain() {
        let disabled = Options::default().with_validation(false);
        let err = Add(1).next(Double).run(2, &disabled).unwrap_err();
        let stopped = err.downcast_ref::<CompilerStopped>().unwrap();
        assert_eq!(stopped.0, "double");
    }

    #[test]
    fn closures_are_stages() {
        let mut square = |x: u32, _: &Options| -> CompilerResult<u32> { Ok(x * x) };
        let stage = &mut square as &mut dyn FnMut(u32, &Options) -> CompilerResult<u32>;
        let result = Add(2).next(stage).run(1, &Options::default()).unwrap();
        assert_eq!(result, 9);
    }
}
