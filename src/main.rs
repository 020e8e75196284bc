//! Windowed demo: `riptide [sph|fountain]`.
//!
//! `sph` runs the full neighbor-indexed SPH chain on a dam-break block,
//! updating in place. `fountain` runs the ballistic capture kernel on a
//! particle fountain, exercising the ping-pong path. Space pauses, R
//! reseeds, Escape quits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use riptide::prelude::*;
use riptide::{wgpu, DeviceError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

const MAX_NEIGHBORS: u32 = 40;
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.01,
    g: 0.01,
    b: 0.03,
    a: 1.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Demo {
    Sph,
    Fountain,
}

fn pseudo_random(seed: u32) -> f32 {
    let x = seed.wrapping_mul(1103515245).wrapping_add(12345);
    let x = x ^ (x >> 16);
    (x & 0x7fff_ffff) as f32 / 0x7fff_ffff as f32
}

/// A block of fluid in the lower left of the tank.
fn dam_break() -> Vec<Particle> {
    let (cols, rows) = (24u32, 40u32);
    let spacing = 0.02;
    let mut particles = Vec::with_capacity((cols * rows) as usize);
    for col in 0..cols {
        for row in 0..rows {
            let jitter = (pseudo_random(col * rows + row) - 0.5) * spacing * 0.1;
            particles.push(Particle::new(
                Vec2::new(
                    -0.48 + col as f32 * spacing + jitter,
                    -0.78 + row as f32 * spacing,
                ),
                Vec2::ZERO,
                0.2,
            ));
        }
    }
    particles
}

/// Everything at the origin, launched in an upward fan.
fn fountain() -> Vec<Particle> {
    (0..10_000)
        .map(|i| {
            let rho = 0.05 + 0.2 * pseudo_random(i * 2);
            let phi = std::f32::consts::PI * (0.25 + 0.5 * pseudo_random(i * 2 + 1));
            Particle::new(Vec2::ZERO, Vec2::new(rho * phi.cos(), rho * phi.sin()), 1.0)
        })
        .collect()
}

fn seed(demo: Demo) -> Vec<Particle> {
    match demo {
        Demo::Sph => dam_break(),
        Demo::Fountain => fountain(),
    }
}

fn build_pipeline(
    ctx: &GpuContext,
    demo: Demo,
    format: wgpu::TextureFormat,
) -> Result<Pipeline, Error> {
    let render = Technique::compile(ctx, "points", sph::point_render())?;
    let mut builder = PipelineBuilder::new(render)
        .with_target_format(format)
        .with_clear_color(CLEAR_COLOR)
        .with_particles(&seed(demo));

    let mut pipeline = match demo {
        Demo::Sph => {
            builder = builder.with_neighbor_index(MAX_NEIGHBORS);
            for stage in sph::update_stages(ctx, MAX_NEIGHBORS)? {
                builder = builder.add_update_stage(stage);
            }
            builder.build(ctx)?
        }
        Demo::Fountain => {
            let advect = Technique::compile(ctx, "advect", sph::capture_advect())?;
            builder.add_update_stage(advect).build(ctx)?
        }
    };

    match demo {
        Demo::Sph => SphConfig::default().apply(&mut pipeline),
        Demo::Fountain => {
            pipeline.set_uniform_all("dt", 0.01);
            pipeline.set_uniform_all("gravity", Vec2::new(0.0, -0.5));
        }
    }

    for stage in pipeline.stages() {
        tracing::info!("{}", stage.info());
    }
    Ok(pipeline)
}

struct DemoState {
    ctx: GpuContext,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    pipeline: Pipeline,
    time: Time,
    last_log: Instant,
}

impl DemoState {
    async fn new(window: Arc<Window>, demo: Demo) -> Result<Self, Box<dyn std::error::Error>> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window)?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(DeviceError::NoAdapter)?;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("riptide demo"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(DeviceError::from)?;
        let ctx = GpuContext::new(device, queue);

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(ctx.device(), &config);

        let pipeline = build_pipeline(&ctx, demo, format)?;
        Ok(Self {
            ctx,
            surface,
            config,
            pipeline,
            time: Time::new(),
            last_log: Instant::now(),
        })
    }

    fn resize(&mut self, size: winit::dpi::PhysicalSize<u32>) {
        if size.width > 0 && size.height > 0 {
            self.config.width = size.width;
            self.config.height = size.height;
            self.surface.configure(self.ctx.device(), &self.config);
        }
    }

    fn frame(&mut self) -> Result<(), wgpu::SurfaceError> {
        self.time.tick();
        if !self.time.is_paused() {
            if let Err(e) = self.pipeline.update(&self.ctx) {
                tracing::error!("update failed: {e}");
            }
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.pipeline.render(&self.ctx, &view);
        output.present();

        if self.last_log.elapsed() >= Duration::from_secs(1) {
            let stats = self.pipeline.frame_stats();
            tracing::info!("{:.0} fps, {} particles", self.time.fps(), stats.last_drawn);
            self.last_log = Instant::now();
        }
        Ok(())
    }
}

struct App {
    demo: Demo,
    window: Option<Arc<Window>>,
    state: Option<DemoState>,
}

impl App {
    fn new(demo: Demo) -> Self {
        Self {
            demo,
            window: None,
            state: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("riptide")
            .with_inner_size(winit::dpi::LogicalSize::new(800, 600));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                tracing::error!("window creation failed: {e}");
                event_loop.exit();
                return;
            }
        };
        match pollster::block_on(DemoState::new(window.clone(), self.demo)) {
            Ok(state) => {
                self.window = Some(window);
                self.state = Some(state);
            }
            Err(e) => {
                tracing::error!("demo setup failed: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.resize(size);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(state) = &mut self.state {
                    match code {
                        KeyCode::Space => {
                            state.time.toggle_pause();
                            tracing::info!(
                                "{}",
                                if state.time.is_paused() { "paused" } else { "resumed" }
                            );
                        }
                        KeyCode::KeyR => {
                            state.pipeline.set_particles(&state.ctx, &seed(self.demo));
                        }
                        KeyCode::Escape => event_loop.exit(),
                        _ => {}
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    match state.frame() {
                        Ok(()) => {}
                        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                            let size = winit::dpi::PhysicalSize {
                                width: state.config.width,
                                height: state.config.height,
                            };
                            state.resize(size);
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => {
                            tracing::error!("surface out of memory");
                            event_loop.exit();
                        }
                        Err(e) => tracing::warn!("frame skipped: {e}"),
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "riptide=info,wgpu_core=warn,wgpu_hal=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let demo = match std::env::args().nth(1).as_deref() {
        None | Some("sph") => Demo::Sph,
        Some("fountain") => Demo::Fountain,
        Some(other) => {
            eprintln!("usage: riptide [sph|fountain] (got '{other}')");
            std::process::exit(2);
        }
    };

    let event_loop = EventLoop::new().unwrap();
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(demo);
    event_loop.run_app(&mut app).unwrap();
}
