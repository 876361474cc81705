//! The read / transform / write capability a pipeline stage plugs in.

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A named compute step.
pub struct Step<'a, D> {
    name: String,
    run: Box<dyn Fn(D) -> anyhow::Result<D> + 'a>,
}

impl<'a, D> Step<'a, D> {
    pub fn new(name: impl Into<String>, run: impl Fn(D) -> anyhow::Result<D> + 'a) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self, data: D) -> anyhow::Result<D> {
        (self.run)(data)
    }
}

impl<D> fmt::Debug for Step<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Stage-specific strategy injected into the materializer.
///
/// `read` should return a deferred representation (for example a lazy query)
/// rather than eagerly loading a large shard. `transform` must be a pure
/// function of its input. `write` may write non-atomically; the materializer
/// always writes to a temporary sibling and renames it into place.
pub trait Stage {
    type Data;

    /// Open the input (a file or a directory of files).
    fn read(&self, input: &Path) -> anyhow::Result<Self::Data>;

    /// Compute the output representation. Defaults to the identity.
    fn transform(&self, data: Self::Data) -> anyhow::Result<Self::Data> {
        Ok(data)
    }

    /// Serialize `data` to `path`.
    fn write(&self, data: &Self::Data, path: &Path) -> anyhow::Result<()>;

    /// Load a previously written artifact. Defaults to [`Stage::read`].
    fn load(&self, artifact: &Path) -> anyhow::Result<Self::Data> {
        self.read(artifact)
    }

    /// The compute as an ordered list of steps.
    ///
    /// Multi-step stages get their intermediate results checkpointed when
    /// intermediate caching is enabled. Defaults to a single step running
    /// [`Stage::transform`].
    fn steps(&self) -> Vec<Step<'_, Self::Data>> {
        vec![Step::new("transform", move |data| self.transform(data))]
    }
}

impl<S: Stage + ?Sized> Stage for &S {
    type Data = S::Data;

    fn read(&self, input: &Path) -> anyhow::Result<Self::Data> {
        (**self).read(input)
    }

    fn transform(&self, data: Self::Data) -> anyhow::Result<Self::Data> {
        (**self).transform(data)
    }

    fn write(&self, data: &Self::Data, path: &Path) -> anyhow::Result<()> {
        (**self).write(data, path)
    }

    fn load(&self, artifact: &Path) -> anyhow::Result<Self::Data> {
        (**self).load(artifact)
    }

    fn steps(&self) -> Vec<Step<'_, Self::Data>> {
        (**self).steps()
    }
}

/// A [`Stage`] assembled from three closures.
pub struct FnStage<D, R, C, W> {
    read: R,
    compute: C,
    write: W,
    _data: PhantomData<fn() -> D>,
}

impl<D, R, C, W> FnStage<D, R, C, W>
where
    R: Fn(&Path) -> anyhow::Result<D>,
    C: Fn(D) -> anyhow::Result<D>,
    W: Fn(&D, &Path) -> anyhow::Result<()>,
{
    pub fn new(read: R, compute: C, write: W) -> Self {
        Self {
            read,
            compute,
            write,
            _data: PhantomData,
        }
    }
}

impl<D, R, C, W> Stage for FnStage<D, R, C, W>
where
    R: Fn(&Path) -> anyhow::Result<D>,
    C: Fn(D) -> anyhow::Result<D>,
    W: Fn(&D, &Path) -> anyhow::Result<()>,
{
    type Data = D;

    fn read(&self, input: &Path) -> anyhow::Result<D> {
        (self.read)(input)
    }

    fn transform(&self, data: D) -> anyhow::Result<D> {
        (self.compute)(data)
    }

    fn write(&self, data: &D, path: &Path) -> anyhow::Result<()> {
        (self.write)(data, path)
    }
}

/// One unit of orchestrated work: an input, the output it produces, and the
/// stage that gets from one to the other.
#[derive(Debug, Clone)]
pub struct WorkItem<S> {
    pub input: PathBuf,
    pub output: PathBuf,
    pub stage: S,
}

impl<S: Stage> WorkItem<S> {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, stage: S) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl Stage for Doubler {
        type Data = i64;

        fn read(&self, _input: &Path) -> anyhow::Result<i64> {
            Ok(21)
        }

        fn transform(&self, data: i64) -> anyhow::Result<i64> {
            Ok(data * 2)
        }

        fn write(&self, _data: &i64, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_steps_run_transform() {
        let stage = Doubler;
        let steps = stage.steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name(), "transform");
        assert_eq!(steps[0].run(21).unwrap(), 42);
    }

    #[test]
    fn test_fn_stage() {
        let stage = FnStage::new(
            |path: &Path| Ok(path.to_string_lossy().len()),
            |n: usize| Ok(n + 1),
            |_: &usize, _: &Path| Ok(()),
        );
        let data = stage.read(Path::new("abc")).unwrap();
        assert_eq!(stage.transform(data).unwrap(), 4);
        assert_eq!(stage.load(Path::new("abcd")).unwrap(), 4);
    }
}
