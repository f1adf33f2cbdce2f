//! Scoped save/restore of the backend's render target and viewport

use std::ops::{Deref, DerefMut};

use crate::backend::{GraphicsBackend, RenderTargetHandle, Viewport};

/// Remembers the bound render target and viewport on creation and puts
/// them back when dropped, whatever path the scope exits through.
pub struct RenderStateGuard<'a, B: GraphicsBackend + ?Sized> {
    backend: &'a mut B,
    target: Option<RenderTargetHandle>,
    viewport: Viewport,
}

impl<'a, B: GraphicsBackend + ?Sized> RenderStateGuard<'a, B> {
    pub fn new(backend: &'a mut B) -> Self {
        let target = backend.current_render_target();
        let viewport = backend.viewport();
        Self {
            backend,
            target,
            viewport,
        }
    }

    pub fn saved_target(&self) -> Option<RenderTargetHandle> {
        self.target
    }

    pub fn saved_viewport(&self) -> Viewport {
        self.viewport
    }
}

impl<B: GraphicsBackend + ?Sized> Deref for RenderStateGuard<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: GraphicsBackend + ?Sized> DerefMut for RenderStateGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: GraphicsBackend + ?Sized> Drop for RenderStateGuard<'_, B> {
    fn drop(&mut self) {
        self.backend.bind_render_target(self.target);
        self.backend.set_viewport(self.viewport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ColorStorage, DummyBackend, RenderTargetDescriptor, TextureFormat};

    #[test]
    fn test_guard_restores_state() {
        let mut backend = DummyBackend::new();
        let caller = backend
            .create_render_target(&RenderTargetDescriptor::new(
                64,
                TextureFormat::Rgba8Unorm,
                ColorStorage::Owned,
            ))
            .unwrap();
        let other = backend
            .create_render_target(&RenderTargetDescriptor::new(
                8,
                TextureFormat::Rgba8Unorm,
                ColorStorage::Owned,
            ))
            .unwrap();
        backend.bind_render_target(Some(caller));
        backend.set_viewport(Viewport::new(3, 5, 40, 30));

        {
            let mut guard = RenderStateGuard::new(&mut backend);
            assert_eq!(guard.saved_target(), Some(caller));
            assert_eq!(guard.saved_viewport(), Viewport::new(3, 5, 40, 30));
            guard.bind_render_target(Some(other));
            guard.set_viewport(Viewport::square(8));
        }

        assert_eq!(backend.current_render_target(), Some(caller));
        assert_eq!(backend.viewport(), Viewport::new(3, 5, 40, 30));
    }

    #[test]
    fn test_guard_restores_unbound_state() {
        let mut backend = DummyBackend::new();
        let other = backend
            .create_render_target(&RenderTargetDescriptor::new(
                8,
                TextureFormat::Rgba8Unorm,
                ColorStorage::Owned,
            ))
            .unwrap();

        {
            let mut guard = RenderStateGuard::new(&mut backend);
            guard.bind_render_target(Some(other));
        }

        assert_eq!(backend.current_render_target(), None);
        assert_eq!(backend.viewport(), Viewport::default());
    }
}
