//! Desktop preview window: shows rendered frames and turns mouse and keyboard
//! input into viewer commands.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::RgbaImage;
use softbuffer::{Context as SoftContext, Surface};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::{FrameDriver, ViewMode};
use crate::events::ViewerCommand;
use crate::placement::Controls;
use crate::render::immersive::backend::SceneBackend;
use crate::tasks::viewer::{RunSummary, Viewer, ViewerInputs};

/// Poll period for producer channels while waiting on camera frames.
const INPUT_POLL: Duration = Duration::from_millis(4);
const OFFSET_STEP: f32 = 0.02;
const SCALE_STEP: f32 = 0.05;
const ROTATION_STEP: f32 = 0.05;

#[derive(Debug)]
enum PreviewEvent {
    Cancelled,
}

type WindowHandle = Arc<Window>;

struct PreviewApp {
    viewer: Viewer,
    inputs: ViewerInputs,
    commands: mpsc::Receiver<ViewerCommand>,
    commands_open: bool,
    cancel: CancellationToken,
    frame_limit: Option<u64>,
    window: Option<WindowHandle>,
    context: Option<SoftContext<WindowHandle>>,
    surface: Option<Surface<WindowHandle, WindowHandle>>,
    cursor: PhysicalPosition<f64>,
    frame: Option<RgbaImage>,
    next_tick: Instant,
    /// Exit requested; waiting for captures still being written.
    closing: bool,
    stabilize: bool,
    transparent: bool,
}

impl PreviewApp {
    fn new(
        viewer: Viewer,
        inputs: ViewerInputs,
        commands: mpsc::Receiver<ViewerCommand>,
        cancel: CancellationToken,
        frame_limit: Option<u64>,
    ) -> Self {
        Self {
            viewer,
            inputs,
            commands,
            commands_open: true,
            cancel,
            frame_limit,
            window: None,
            context: None,
            surface: None,
            cursor: PhysicalPosition::new(0.0, 0.0),
            frame: None,
            next_tick: Instant::now(),
            closing: false,
            stabilize: false,
            transparent: false,
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }
        let (w, h) = self.initial_size();
        let attrs = WindowAttributes::default()
            .with_title("myreal-ar preview")
            .with_inner_size(PhysicalSize::new(w, h));
        let window = WindowHandle::new(
            event_loop
                .create_window(attrs)
                .context("failed to create preview window")?,
        );
        let context = SoftContext::new(window.clone())
            .map_err(|e| anyhow::anyhow!("failed to create softbuffer context: {e}"))?;
        let surface = Surface::new(&context, window.clone())
            .map_err(|e| anyhow::anyhow!("failed to create softbuffer surface: {e}"))?;
        self.context = Some(context);
        self.surface = Some(surface);
        self.handle_resize(window.inner_size());
        info!(width = w, height = h, "preview window opened");
        self.window = Some(window);
        Ok(())
    }

    fn initial_size(&self) -> (u32, u32) {
        match self.viewer.mode() {
            ViewMode::Immersive => self
                .viewer
                .immersive()
                .map_or((720, 960), |r| r.backend().viewport()),
            ViewMode::Camera | ViewMode::Auto => self
                .viewer
                .fallback()
                .map_or((720, 960), |c| c.canvas_size()),
        }
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(surface) = self.surface.as_mut()
            && let (Some(width), Some(height)) = (
                NonZeroU32::new(size.width.max(1)),
                NonZeroU32::new(size.height.max(1)),
            )
            && let Err(err) = surface.resize(width, height)
        {
            warn!(error = %err, "preview surface resize failed");
        }
    }

    fn present(&mut self) {
        let (Some(surface), Some(window)) = (self.surface.as_mut(), self.window.as_ref()) else {
            return;
        };
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));
        let Ok(mut buffer) = surface.buffer_mut() else {
            warn!("preview buffer unavailable");
            return;
        };
        match self.frame.as_ref() {
            Some(frame) => blit_nearest(frame, &mut buffer, width, height),
            None => buffer.fill(0),
        }
        if let Err(err) = buffer.present() {
            warn!(error = %err, "failed to present preview frame");
        }
    }

    fn send(&mut self, cmd: ViewerCommand) {
        self.viewer.on_command(cmd);
    }

    fn nudge(&mut self, f: impl FnOnce(&mut Controls)) {
        let mut controls = self.viewer.controls();
        f(&mut controls);
        self.send(ViewerCommand::SetControls(controls));
    }

    fn handle_key(&mut self, event: &KeyEvent, event_loop: &ActiveEventLoop) {
        if event.state != ElementState::Pressed {
            return;
        }
        match &event.logical_key {
            Key::Named(NamedKey::Escape) => {
                info!("preview closed from keyboard");
                self.close(event_loop);
            }
            Key::Named(NamedKey::Space) => self.send(ViewerCommand::Capture),
            Key::Named(NamedKey::Enter) => self.send(ViewerCommand::StartSession),
            Key::Named(NamedKey::ArrowLeft) => self.nudge(|c| c.offset_x -= OFFSET_STEP),
            Key::Named(NamedKey::ArrowRight) => self.nudge(|c| c.offset_x += OFFSET_STEP),
            Key::Named(NamedKey::ArrowUp) => self.nudge(|c| c.offset_y -= OFFSET_STEP),
            Key::Named(NamedKey::ArrowDown) => self.nudge(|c| c.offset_y += OFFSET_STEP),
            Key::Character(ch) => match ch.as_str() {
                "p" => self.send(ViewerCommand::Place),
                "r" => self.send(ViewerCommand::Recenter),
                "g" => self.send(ViewerCommand::RequestSensorPermission),
                "e" => self.send(ViewerCommand::EndSession),
                "s" => {
                    self.stabilize = !self.stabilize;
                    self.send(ViewerCommand::SetStabilize(self.stabilize));
                }
                "t" => {
                    self.transparent = !self.transparent;
                    self.send(ViewerCommand::SetTransparentBackground(self.transparent));
                }
                "m" => {
                    let next = match self.viewer.mode() {
                        ViewMode::Immersive => ViewMode::Camera,
                        ViewMode::Camera | ViewMode::Auto => ViewMode::Immersive,
                    };
                    self.send(ViewerCommand::SwitchMode(next));
                }
                "+" | "=" => self.nudge(|c| c.scale += SCALE_STEP),
                "-" => self.nudge(|c| c.scale -= SCALE_STEP),
                "[" => self.nudge(|c| c.rotation -= ROTATION_STEP),
                "]" => self.nudge(|c| c.rotation += ROTATION_STEP),
                "0" => self.send(ViewerCommand::ResetControls),
                _ => {}
            },
            _ => {}
        }
    }

    fn tap(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        let size = window.inner_size();
        let x = (self.cursor.x / f64::from(size.width.max(1))) as f32;
        let y = (self.cursor.y / f64::from(size.height.max(1))) as f32;
        self.send(ViewerCommand::Tap { x, y });
    }

    /// Drain producer channels. Returns whether a camera frame arrived.
    fn drain_inputs(&mut self) -> bool {
        while let Ok(sample) = self.inputs.orientation.try_recv() {
            self.viewer.on_orientation(sample);
        }
        let mut fresh = false;
        while let Ok(frame) = self.inputs.camera.try_recv() {
            self.viewer.on_camera_frame(frame);
            fresh = true;
        }
        while self.commands_open {
            match self.commands.try_recv() {
                Ok(cmd) => self.viewer.on_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.commands_open = false,
            }
        }
        fresh
    }

    /// Exit once every pending capture is written.
    fn close(&mut self, event_loop: &ActiveEventLoop) {
        self.closing = true;
        self.viewer.collect_captures();
        let pending = self.viewer.captures_in_flight();
        if pending == 0 {
            event_loop.exit();
        } else {
            debug!(pending, "waiting for captures before closing");
            event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + INPUT_POLL));
        }
    }

    fn step(&mut self, event_loop: &ActiveEventLoop) {
        if self.closing {
            self.close(event_loop);
            return;
        }
        let fresh = self.drain_inputs();
        let now = Instant::now();
        let follow_camera = self.viewer.frame_driver() == FrameDriver::VideoFrame;
        let interval_elapsed = now >= self.next_tick;
        if interval_elapsed {
            self.next_tick = now + self.viewer.frame_interval();
        }
        let due = (follow_camera && fresh)
            || (interval_elapsed && self.viewer.interval_tick_due(now));
        if due {
            if let Some(frame) = self.viewer.tick() {
                self.frame = Some(frame.image);
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
        }
        if self.viewer.is_finished() {
            info!(status = ?self.viewer.status(), "viewer finished; closing preview");
            self.close(event_loop);
            return;
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.viewer.frames_rendered() >= limit)
        {
            debug!("frame limit reached");
            self.close(event_loop);
            return;
        }
        let wake = self.next_tick.min(now + INPUT_POLL);
        event_loop.set_control_flow(ControlFlow::WaitUntil(wake));
    }
}

/// Scale `frame` to the window with nearest sampling, alpha over black.
fn blit_nearest(frame: &RgbaImage, buffer: &mut [u32], width: u32, height: u32) {
    let (fw, fh) = frame.dimensions();
    if fw == 0 || fh == 0 {
        buffer.fill(0);
        return;
    }
    for (y, row) in buffer.chunks_mut(width as usize).take(height as usize).enumerate() {
        let sy = ((y as u64 * u64::from(fh)) / u64::from(height)) as u32;
        for (x, px) in row.iter_mut().enumerate() {
            let sx = ((x as u64 * u64::from(fw)) / u64::from(width)) as u32;
            let [r, g, b, a] = frame.get_pixel(sx.min(fw - 1), sy.min(fh - 1)).0;
            let a = u32::from(a);
            let (r, g, b) = (
                u32::from(r) * a / 255,
                u32::from(g) * a / 255,
                u32::from(b) * a / 255,
            );
            *px = (r << 16) | (g << 8) | b;
        }
    }
}

impl ApplicationHandler<PreviewEvent> for PreviewApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }
        if let Err(err) = self.ensure_window(event_loop) {
            error!(error = ?err, "preview window unavailable");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.clone() else {
            return;
        };
        if window.id() != window_id {
            return;
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                info!("preview window close requested");
                self.close(event_loop);
            }
            WindowEvent::Resized(size) => {
                self.handle_resize(size);
                window.request_redraw();
            }
            WindowEvent::RedrawRequested => self.present(),
            WindowEvent::CursorMoved { position, .. } => self.cursor = position,
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => self.tap(),
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(&event, event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.step(event_loop);
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: PreviewEvent) {
        match event {
            PreviewEvent::Cancelled => {
                info!("preview received cancellation");
                self.close(event_loop);
            }
        }
    }
}

/// Run the viewer inside a desktop window on the calling thread. Returns when
/// the window closes, the viewer finishes or `cancel` fires.
pub fn run_windowed(
    viewer: Viewer,
    inputs: ViewerInputs,
    commands: mpsc::Receiver<ViewerCommand>,
    cancel: CancellationToken,
    frame_limit: Option<u64>,
) -> Result<RunSummary> {
    let event_loop = EventLoop::<PreviewEvent>::with_user_event()
        .build()
        .context("failed to build preview event loop")?;
    let proxy = event_loop.create_proxy();

    let cancel_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = proxy.send_event(PreviewEvent::Cancelled);
        })
    };

    let mut app = PreviewApp::new(viewer, inputs, commands, cancel, frame_limit);
    let run_result = event_loop.run_app(&mut app);
    cancel_task.abort();

    let PreviewApp {
        mut viewer, frame, ..
    } = app;
    viewer.collect_captures();
    viewer.teardown();
    run_result.context("preview event loop failed")?;
    Ok(RunSummary {
        frames: viewer.frames_rendered(),
        status: viewer.status(),
        captures: viewer.captures().to_vec(),
        live_resources: viewer.live_resources(),
        last_frame: frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn blit_scales_and_darkens_by_alpha() {
        let mut frame = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        frame.put_pixel(1, 1, Rgba([0, 0, 255, 0]));
        let mut buffer = vec![0u32; 16];
        blit_nearest(&frame, &mut buffer, 4, 4);
        assert_eq!(buffer[0], 0x00ff_0000);
        assert_eq!(buffer[15], 0);
        assert_eq!(buffer[3], 0x00ff_0000);
    }
}
