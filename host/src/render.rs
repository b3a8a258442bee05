//! Software renderer for captures.
//!
//! Draws flat quads for the canvas items the host knows about: color
//! rects and buttons on the UI layer, sprites on the world layer. Textures
//! are never sampled; a sprite with a texture draws a placeholder quad
//! tinted by its modulate chain.

use scenewire_engine::registry::TypeRegistry;
use scenewire_engine::tree::{NodeId, SceneTree};
use scenewire_engine::value::{Color, Value, Vector2};

/// Background of every frame.
pub const CLEAR_COLOR: Color = Color::rgba(0.3, 0.3, 0.3, 1.0);

const BUTTON_COLOR: Color = Color::rgba(0.25, 0.25, 0.3, 1.0);
const BUTTON_PRESSED_COLOR: Color = Color::rgba(0.4, 0.4, 0.5, 1.0);

/// Edge length of the placeholder quad drawn for textured sprites.
pub const SPRITE_PLACEHOLDER_SIZE: f64 = 32.0;

/// Which canvas layers a render includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layers {
    /// Node2D content, seen through the active camera.
    pub world: bool,
    /// Control content, in screen space.
    pub ui: bool,
}

impl Layers {
    pub const WINDOW: Layers = Layers { world: true, ui: true };
    pub const VIEWPORT: Layers = Layers { world: true, ui: false };
}

/// An RGBA8 image, row-major, no padding.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, fill: Color) -> Self {
        let rgba = fill.to_rgba8();
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self { width, height, pixels }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]])
    }

    /// Blend `color` over the pixels whose centers fall inside the
    /// rectangle `[x0, x1) x [y0, y1)`.
    pub fn fill_rect(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, color: Color) {
        if color.a <= 0.0 {
            return;
        }
        let clamp_x = |v: f64| (v - 0.5).ceil().clamp(0.0, self.width as f64) as usize;
        let clamp_y = |v: f64| (v - 0.5).ceil().clamp(0.0, self.height as f64) as usize;
        let (left, right) = (clamp_x(x0.min(x1)), clamp_x(x0.max(x1)));
        let (top, bottom) = (clamp_y(y0.min(y1)), clamp_y(y0.max(y1)));

        let src = color.to_rgba8();
        let alpha = src[3] as u32;
        for y in top..bottom {
            let row = y * self.width as usize;
            for x in left..right {
                let i = (row + x) * 4;
                for c in 0..3 {
                    let dst = self.pixels[i + c] as u32;
                    self.pixels[i + c] = ((src[c] as u32 * alpha + dst * (255 - alpha)) / 255) as u8;
                }
                let dst_a = self.pixels[i + 3] as u32;
                self.pixels[i + 3] = (alpha + dst_a * (255 - alpha) / 255).min(255) as u8;
            }
        }
    }

    /// Nearest-neighbour resize.
    pub fn resize(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            let sy = (y as u64 * self.height as u64 / height.max(1) as u64) as usize;
            for x in 0..width {
                let sx = (x as u64 * self.width as u64 / width.max(1) as u64) as usize;
                let i = (sy * self.width as usize + sx) * 4;
                pixels.extend_from_slice(&self.pixels[i..i + 4]);
            }
        }
        Frame { width, height, pixels }
    }

    /// Lossless PNG encoding.
    pub fn encode_png(&self) -> Result<Vec<u8>, png::EncodingError> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
            writer.finish()?;
        }
        Ok(out)
    }
}

struct DrawCommand {
    z: i64,
    rect: [f64; 4],
    color: Color,
}

/// World-to-screen mapping of the active 2D camera.
#[derive(Debug, Clone, Copy)]
struct Camera {
    center: Vector2,
    zoom: Vector2,
    half_screen: Vector2,
}

impl Camera {
    fn apply(&self, p: Vector2) -> Vector2 {
        Vector2::new(
            (p.x - self.center.x) * self.zoom.x + self.half_screen.x,
            (p.y - self.center.y) * self.zoom.y + self.half_screen.y,
        )
    }
}

fn vector(tree: &SceneTree, id: NodeId, name: &str, default: Vector2) -> Vector2 {
    tree.get(id)
        .and_then(|n| n.properties.get(name))
        .and_then(Value::as_vector2)
        .unwrap_or(default)
}

fn flag(tree: &SceneTree, id: NodeId, name: &str, default: bool) -> bool {
    tree.get(id)
        .and_then(|n| n.properties.get(name))
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

fn find_camera(tree: &SceneTree, registry: &TypeRegistry, width: u32, height: u32) -> Option<Camera> {
    let id = tree.subtree(tree.root()).into_iter().find(|id| {
        tree.get(*id)
            .map(|n| registry.is_a(&n.type_name, "Camera2D") && flag(tree, *id, "enabled", true))
            .unwrap_or(false)
    })?;
    let position = tree.global_position(registry, id);
    let offset = vector(tree, id, "offset", Vector2::ZERO);
    Some(Camera {
        center: Vector2::new(position.x + offset.x, position.y + offset.y),
        zoom: vector(tree, id, "zoom", Vector2::new(1.0, 1.0)),
        half_screen: Vector2::new(width as f64 / 2.0, height as f64 / 2.0),
    })
}

/// Render the live tree into a `width` x `height` frame.
pub fn render_tree(tree: &SceneTree, registry: &TypeRegistry, width: u32, height: u32, layers: Layers) -> Frame {
    let camera = find_camera(tree, registry, width, height);
    let mut commands = Vec::new();
    collect(tree, registry, tree.root(), Color::WHITE, camera, layers, &mut commands);
    // Stable: equal z keeps tree order.
    commands.sort_by_key(|c| c.z);

    let mut frame = Frame::new(width, height, CLEAR_COLOR);
    for cmd in commands {
        let [x0, y0, x1, y1] = cmd.rect;
        frame.fill_rect(x0, y0, x1, y1, cmd.color);
    }
    frame
}

fn collect(
    tree: &SceneTree,
    registry: &TypeRegistry,
    id: NodeId,
    inherited: Color,
    camera: Option<Camera>,
    layers: Layers,
    out: &mut Vec<DrawCommand>,
) {
    let Some(node) = tree.get(id) else { return };
    let type_name = node.type_name.as_str();
    let mut modulate = inherited;

    if registry.is_a(type_name, "CanvasItem") {
        if !flag(tree, id, "visible", true) {
            return;
        }
        let own = node
            .properties
            .get("modulate")
            .and_then(Value::as_color)
            .unwrap_or(Color::WHITE);
        modulate = inherited.multiply(&own);
        let z = node.properties.get("z_index").and_then(Value::as_i64).unwrap_or(0);

        if layers.ui && registry.is_a(type_name, "Control") {
            let pos = tree.global_position(registry, id);
            let size = vector(tree, id, "size", Vector2::ZERO);
            let rect = [pos.x, pos.y, pos.x + size.x, pos.y + size.y];
            if registry.is_a(type_name, "ColorRect") {
                let color = node
                    .properties
                    .get("color")
                    .and_then(Value::as_color)
                    .unwrap_or(Color::WHITE);
                out.push(DrawCommand { z, rect, color: color.multiply(&modulate) });
            } else if registry.is_a(type_name, "Button") {
                let base = if flag(tree, id, "button_pressed", false) {
                    BUTTON_PRESSED_COLOR
                } else {
                    BUTTON_COLOR
                };
                out.push(DrawCommand { z, rect, color: base.multiply(&modulate) });
            }
        }

        if layers.world
            && registry.is_a(type_name, "Sprite2D")
            && matches!(node.properties.get("texture"), Some(Value::Resource(_)))
        {
            let pos = tree.global_position(registry, id);
            let offset = vector(tree, id, "offset", Vector2::ZERO);
            let scale = vector(tree, id, "scale", Vector2::new(1.0, 1.0));
            let zoom = camera.map(|c| c.zoom).unwrap_or(Vector2::new(1.0, 1.0));
            let w = SPRITE_PLACEHOLDER_SIZE * scale.x.abs() * zoom.x;
            let h = SPRITE_PLACEHOLDER_SIZE * scale.y.abs() * zoom.y;
            let anchor = Vector2::new(pos.x + offset.x, pos.y + offset.y);
            let screen = camera.map(|c| c.apply(anchor)).unwrap_or(anchor);
            let (x0, y0) = if flag(tree, id, "centered", true) {
                (screen.x - w / 2.0, screen.y - h / 2.0)
            } else {
                (screen.x, screen.y)
            };
            out.push(DrawCommand { z, rect: [x0, y0, x0 + w, y0 + h], color: modulate });
        }
    }

    for child in node.children() {
        collect(tree, registry, *child, modulate, camera, layers, out);
    }
}
