use crate::render::AsciiOutput;

/// The surface the engine draws into.
///
/// `size` is the drawable area in pixels; the character grid is that size
/// times the configured resolution. `present` receives the grid once per
/// rendered frame, `unmount` is called exactly once when the engine is disposed.
pub trait Host {
    fn size(&self) -> (u32, u32);

    fn mount(&mut self) {}

    fn present(&mut self, output: &AsciiOutput);

    fn unmount(&mut self);
}

impl<T: Host + ?Sized> Host for Box<T> {
    fn size(&self) -> (u32, u32) {
        (**self).size()
    }

    fn mount(&mut self) {
        (**self).mount()
    }

    fn present(&mut self, output: &AsciiOutput) {
        (**self).present(output)
    }

    fn unmount(&mut self) {
        (**self).unmount()
    }
}
