//! [`GpuDevice`] backed by a real wgpu device.
//!
//! Every call is encoded and submitted immediately, so the storage layer sees
//! the same ordering guarantees it gets from the headless device. The system
//! framebuffer is an offscreen RGBA8 texture; the embedding application
//! presents it however it likes.

use std::num::NonZeroU32;

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use naga_oil::compose::ComposerError;
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use super::device::{
    FboId, FramebufferStatus, GpuDevice, GpuFormat, Primitive, SamplerState, TexId, TextureDesc,
    TransferFormat, Upload,
};
use super::pipeline_helpers::{copy_bind_group_layout, copy_pipeline};
use super::render_context::RenderContext;
use super::shader_composer::{ShaderComposer, COPY_SHADER};
use super::texture::{storage_layout, GpuTexture, Swizzle};
use crate::effects::{BoundProgram, CopyUniforms, CopyVariant};
use crate::image::{pixel, ImageFormat, Layout};
use crate::util::rect::Rect2i;

const FLAG_SECTION: u32 = 1;
const FLAG_LINEAR: u32 = 2;
const FLAG_REPEAT: u32 = 4;

/// GPU-side mirror of `CopyParams` in `copy.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CopyParams {
    copy_section: [f32; 4],
    source_section: [f32; 4],
    color_in: [f32; 4],
    viewport: [f32; 4],
    pixel_size: [f32; 2],
    base_size: [f32; 2],
    size: [f32; 2],
    layer: f32,
    lod: f32,
    multiply: f32,
    mip_level: f32,
    stride: f32,
    shift: f32,
    mode: u32,
    source_level: u32,
    flags: u32,
    swizzle: u32,
}

impl CopyParams {
    fn new(
        primitive: Primitive,
        program: &BoundProgram,
        viewport: Rect2i,
        source: Option<&GpuTexture>,
    ) -> Self {
        let u = &program.uniforms;
        let mut flags = 0;
        if primitive == Primitive::ScreenQuad && program.variant.uses_copy_section() {
            flags |= FLAG_SECTION;
        }
        let (sampler, swizzle) =
            source.map_or((SamplerState::default(), Swizzle::Identity), |t| (t.sampler, t.swizzle));
        if sampler.filter.is_linear() {
            flags |= FLAG_LINEAR;
        }
        if sampler.repeat {
            flags |= FLAG_REPEAT;
        }
        Self {
            copy_section: u.copy_section.to_array(),
            source_section: u.source_section.to_array(),
            color_in: u.color_in.to_array(),
            viewport: [
                viewport.position.x as f32,
                viewport.position.y as f32,
                viewport.size.x.max(1) as f32,
                viewport.size.y.max(1) as f32,
            ],
            pixel_size: u.pixel_size.to_array(),
            base_size: u.base_size.to_array(),
            size: u.size.to_array(),
            layer: u.layer,
            lod: u.lod,
            multiply: u.multiply,
            mip_level: u.mip_level,
            stride: u.stride,
            shift: u.shift,
            mode: program.variant.mode(),
            source_level: 0,
            flags,
            swizzle: swizzle as u32,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct WgpuFramebuffer {
    color: Option<(TexId, u32)>,
    depth: Option<TexId>,
}

/// Resolved render target of a pass.
struct PassTarget {
    color: wgpu::TextureView,
    color_format: wgpu::TextureFormat,
    color_texture: Option<TexId>,
    depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    extent: Rect2i,
}

/// Hardware [`GpuDevice`].
pub struct WgpuDevice {
    context: RenderContext,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: FxHashMap<(wgpu::TextureFormat, Option<wgpu::TextureFormat>), wgpu::RenderPipeline>,
    textures: FxHashMap<TexId, GpuTexture>,
    framebuffers: FxHashMap<FboId, WgpuFramebuffer>,
    units: FxHashMap<u32, TexId>,
    screen: GpuTexture,
    dummy: GpuTexture,
    bound: Option<FboId>,
    viewport: Rect2i,
    scissor: Option<Rect2i>,
    image_transfer: bool,
    next_name: u32,
}

impl WgpuDevice {
    /// Wrap a render context with a `width`×`height` system framebuffer.
    ///
    /// # Errors
    ///
    /// Returns the composer error if the copy shader fails to compose.
    pub fn new(context: RenderContext, width: u32, height: u32) -> Result<Self, Box<ComposerError>> {
        let mut composer = ShaderComposer::new()?;
        let shader = composer.compose(&context.device, "Copy Shader", COPY_SHADER, "copy.wgsl")?;
        let bind_group_layout = copy_bind_group_layout(&context.device);
        let screen = GpuTexture::new(
            &context.device,
            &TextureDesc::texture_2d(GpuFormat::RGBA8, width, height, "System Framebuffer"),
        );
        let dummy = GpuTexture::new(
            &context.device,
            &TextureDesc::texture_2d(GpuFormat::RGBA8, 1, 1, "Unbound Texture"),
        );
        let image_transfer = context.capabilities().has_image_transfer();
        Ok(Self {
            context,
            shader,
            bind_group_layout,
            pipelines: FxHashMap::default(),
            textures: FxHashMap::default(),
            framebuffers: FxHashMap::default(),
            units: FxHashMap::default(),
            screen,
            dummy,
            bound: None,
            viewport: Rect2i::new(0, 0, width as i32, height as i32),
            scissor: None,
            image_transfer,
            next_name: 0,
        })
    }

    /// The wrapped device and queue.
    #[must_use]
    pub const fn context(&self) -> &RenderContext {
        &self.context
    }

    /// The offscreen texture standing in for the system framebuffer.
    #[must_use]
    pub const fn screen_texture(&self) -> &wgpu::Texture {
        &self.screen.texture
    }

    fn next_name(&mut self) -> NonZeroU32 {
        self.next_name += 1;
        NonZeroU32::MIN.saturating_add(self.next_name - 1)
    }

    fn pipeline(
        &mut self,
        color: wgpu::TextureFormat,
        depth: Option<wgpu::TextureFormat>,
    ) -> &wgpu::RenderPipeline {
        let Self {
            context,
            shader,
            bind_group_layout,
            pipelines,
            ..
        } = self;
        pipelines.entry((color, depth)).or_insert_with(|| {
            log::debug!("creating copy pipeline for {color:?} / {depth:?}");
            copy_pipeline(&context.device, shader, bind_group_layout, color, depth)
        })
    }

    fn pass_target(&self) -> Option<PassTarget> {
        let Some(fbo) = self.bound else {
            return Some(PassTarget {
                color: self.screen.attachment_view(0),
                color_format: self.screen.format,
                color_texture: None,
                depth: None,
                extent: Rect2i::new(
                    0,
                    0,
                    self.screen.desc.width as i32,
                    self.screen.desc.height as i32,
                ),
            });
        };
        let framebuffer = self.framebuffers.get(&fbo)?;
        let (id, level) = framebuffer.color?;
        let texture = self.textures.get(&id)?;
        let extent = texture.level_extent(level);
        let depth = framebuffer
            .depth
            .and_then(|depth| self.textures.get(&depth))
            .map(|depth| (depth.attachment_view(0), depth.format));
        Some(PassTarget {
            color: texture.attachment_view(level),
            color_format: texture.format,
            color_texture: Some(id),
            depth,
            extent: Rect2i::new(0, 0, extent.width as i32, extent.height as i32),
        })
    }

    fn source_view(&self, unit: u32, target: Option<TexId>) -> (wgpu::TextureView, Option<&GpuTexture>) {
        let bound = self
            .units
            .get(&unit)
            .and_then(|id| Some((*id, self.textures.get(id)?)))
            .filter(|(_, texture)| texture.is_sampleable());
        match bound {
            Some((id, texture)) => (texture.sample_view(Some(id) == target), Some(texture)),
            None => (self.dummy.sample_view(false), None),
        }
    }

    fn copy_bind_group(
        &self,
        params: &CopyParams,
        source_view: &wgpu::TextureView,
        aux_view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        let device = &self.context.device;
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Copy Params"),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Copy Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(aux_view),
                },
            ],
        })
    }

    fn encode_draw(
        &mut self,
        primitive: Primitive,
        program: &BoundProgram,
        viewport: Rect2i,
        load: Option<Vec4>,
    ) {
        let Some(target) = self.pass_target() else {
            log::error!("draw with no colour attachment bound");
            return;
        };
        let area = target.extent.intersection(&viewport);
        let scissor = self
            .scissor
            .map_or(area, |scissor| area.intersection(&scissor));
        if !area.has_area() || !scissor.has_area() {
            return;
        }

        let (source_view, source) = self.source_view(0, target.color_texture);
        let (aux_view, _) = self.source_view(1, target.color_texture);
        let params = CopyParams::new(primitive, program, viewport, source);

        let bind_group = self.copy_bind_group(&params, &source_view, &aux_view);

        let mut encoder = self.context.create_encoder("Copy Encoder");
        let color_load = load.map_or(wgpu::LoadOp::Load, |c| {
            wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(c.x),
                g: f64::from(c.y),
                b: f64::from(c.z),
                a: f64::from(c.w),
            })
        });
        let depth_load = if load.is_some() {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };
        let depth_format = target.depth.as_ref().map(|(_, format)| *format);
        let pipeline = self.pipeline(target.color_format, depth_format).clone();
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Copy Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: target.depth.as_ref().map(|(view, _)| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                ..Default::default()
            });
            if load.is_none() {
                pass.set_pipeline(&pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.set_viewport(
                    viewport.position.x as f32,
                    viewport.position.y as f32,
                    viewport.size.x as f32,
                    viewport.size.y as f32,
                    0.0,
                    1.0,
                );
                pass.set_scissor_rect(
                    scissor.position.x as u32,
                    scissor.position.y as u32,
                    scissor.size.x as u32,
                    scissor.size.y as u32,
                );
                pass.draw(0..3, 0..1);
            }
        }
        self.context.submit(encoder);
    }

    /// Copy one level into tightly packed rows of its storage layout.
    fn read_level(&self, texture: &GpuTexture, layer: u32, level: u32, region: Rect2i) -> Option<Vec<u8>> {
        let block_bytes = texture.format.block_copy_size(None)?;
        let (bw, bh) = texture.format.block_dimensions();
        let blocks_x = (region.size.x as u32).div_ceil(bw);
        let blocks_y = (region.size.y as u32).div_ceil(bh);
        let row_bytes = blocks_x * block_bytes;
        let padded_row = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let device = &self.context.device;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: u64::from(padded_row) * u64::from(blocks_y),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.context.create_encoder("Readback Encoder");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: level,
                origin: wgpu::Origin3d {
                    x: region.position.x as u32,
                    y: region.position.y as u32,
                    z: layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(blocks_y),
                },
            },
            wgpu::Extent3d {
                width: blocks_x * bw,
                height: blocks_y * bh,
                depth_or_array_layers: 1,
            },
        );
        self.context.submit(encoder);

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = device.poll(wgpu::PollType::Wait);
        let Ok(Ok(())) = receiver.recv() else {
            log::error!("texture readback failed to map");
            return None;
        };
        let mapped = slice.get_mapped_range();
        let mut out = Vec::with_capacity((row_bytes * blocks_y) as usize);
        for row in mapped.chunks(padded_row as usize).take(blocks_y as usize) {
            out.extend_from_slice(&row[..row_bytes as usize]);
        }
        drop(mapped);
        staging.unmap();
        Some(out)
    }
}

/// Re-encode packed texels from one layout to another.
fn recode(data: &[u8], from: ImageFormat, to: ImageFormat, map: impl Fn(Vec4) -> Vec4) -> Option<Vec<u8>> {
    let Layout::Pixel(stride) = from.layout() else {
        return None;
    };
    let mut out = Vec::with_capacity(data.len());
    for texel in data.chunks_exact(stride as usize) {
        if !pixel::encode(to, map(pixel::decode(from, texel)?), &mut out) {
            return None;
        }
    }
    Some(out)
}

/// Texel as seen through the transfer format, from storage.
fn from_storage(swizzle: Swizzle, transfer: TransferFormat, c: Vec4) -> Vec4 {
    match swizzle {
        _ if transfer == TransferFormat::Alpha => Vec4::new(c.x, 0.0, 0.0, 1.0),
        Swizzle::Luminance => Vec4::new(c.x, c.x, c.x, 1.0),
        Swizzle::LuminanceAlpha => Vec4::new(c.x, c.x, c.x, c.y),
        Swizzle::Identity | Swizzle::Alpha => c,
    }
}

/// Texel as stored, from the transfer format.
fn to_storage(swizzle: Swizzle, c: Vec4) -> Vec4 {
    match swizzle {
        Swizzle::LuminanceAlpha => Vec4::new(c.x, c.w, 0.0, 1.0),
        Swizzle::Identity | Swizzle::Alpha | Swizzle::Luminance => c,
    }
}

impl GpuDevice for WgpuDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> TexId {
        let id = TexId::new(self.next_name());
        let texture = GpuTexture::new(&self.context.device, desc);
        let _ = self.textures.insert(id, texture);
        id
    }

    fn delete_texture(&mut self, id: TexId) {
        match self.textures.remove(&id) {
            Some(texture) => texture.texture.destroy(),
            None => log::debug!("deleting unknown texture {id:?}"),
        }
        self.units.retain(|_, bound| *bound != id);
    }

    fn upload(&mut self, id: TexId, upload: Upload, data: &[u8]) {
        let Some(texture) = self.textures.get(&id) else {
            log::error!("upload to unknown texture {id:?}");
            return;
        };
        let format = texture.desc.format;
        let (bw, bh) = texture.format.block_dimensions();
        let Some(block_bytes) = texture.format.block_copy_size(None) else {
            log::error!("cannot upload to {:?}", texture.format);
            return;
        };
        let blocks_x = upload.width.max(1).div_ceil(bw);
        let blocks_y = upload.height.max(1).div_ceil(bh);

        let converted;
        let bytes = if format.is_compressed() {
            data
        } else {
            let (Some(from), Some(to)) = (format.transfer_layout(), storage_layout(format.internal)) else {
                log::error!("cannot upload {format:?} data");
                return;
            };
            if from == to {
                data
            } else {
                let swizzle = texture.swizzle;
                let Some(recoded) = recode(data, from, to, |c| to_storage(swizzle, c)) else {
                    log::error!("cannot convert {from:?} upload to {to:?}");
                    return;
                };
                converted = recoded;
                &converted
            }
        };
        let needed = (blocks_x * blocks_y * block_bytes) as usize;
        if bytes.len() < needed {
            log::error!(
                "upload of {} bytes is short of the {needed} a {}x{} level needs",
                bytes.len(),
                upload.width,
                upload.height
            );
            return;
        }

        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: upload.level,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: upload.layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &bytes[..needed],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(blocks_x * block_bytes),
                rows_per_image: Some(blocks_y),
            },
            wgpu::Extent3d {
                width: blocks_x * bw,
                height: blocks_y * bh,
                depth_or_array_layers: 1,
            },
        );
    }

    fn set_sampler(&mut self, id: TexId, sampler: SamplerState) {
        if let Some(texture) = self.textures.get_mut(&id) {
            texture.sampler = sampler;
        }
    }

    fn read_texture(&mut self, id: TexId, layer: u32, level: u32) -> Option<Vec<u8>> {
        if !self.image_transfer {
            return None;
        }
        let texture = self.textures.get(&id)?;
        let extent = texture.level_extent(level);
        let stored = self.read_level(
            texture,
            layer,
            level,
            Rect2i::new(0, 0, extent.width as i32, extent.height as i32),
        )?;
        let format = texture.desc.format;
        if format.is_compressed() {
            return Some(stored);
        }
        let from = storage_layout(format.internal)?;
        let to = format.transfer_layout()?;
        if from == to {
            return Some(stored);
        }
        let swizzle = texture.swizzle;
        recode(&stored, from, to, |c| from_storage(swizzle, format.transfer, c))
    }

    fn create_framebuffer(&mut self) -> FboId {
        let id = FboId::new(self.next_name());
        let _ = self.framebuffers.insert(id, WgpuFramebuffer::default());
        id
    }

    fn delete_framebuffer(&mut self, id: FboId) {
        let _ = self.framebuffers.remove(&id);
        if self.bound == Some(id) {
            self.bound = None;
        }
    }

    fn attach_color(&mut self, fbo: FboId, texture: Option<TexId>, level: u32) {
        match self.framebuffers.get_mut(&fbo) {
            Some(framebuffer) => framebuffer.color = texture.map(|id| (id, level)),
            None => log::error!("attaching colour to unknown framebuffer {fbo:?}"),
        }
    }

    fn attach_depth(&mut self, fbo: FboId, texture: Option<TexId>) {
        match self.framebuffers.get_mut(&fbo) {
            Some(framebuffer) => framebuffer.depth = texture,
            None => log::error!("attaching depth to unknown framebuffer {fbo:?}"),
        }
    }

    fn framebuffer_status(&self, fbo: FboId) -> FramebufferStatus {
        let Some(framebuffer) = self.framebuffers.get(&fbo) else {
            return FramebufferStatus::MissingAttachment;
        };
        if framebuffer.color.is_none() && framebuffer.depth.is_none() {
            return FramebufferStatus::MissingAttachment;
        }
        let mut extent = None;
        if let Some((id, level)) = framebuffer.color {
            let Some(texture) = self.textures.get(&id) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            if texture.format.is_depth_stencil_format() || texture.format.is_compressed() {
                return FramebufferStatus::IncompleteAttachment;
            }
            if !texture
                .texture
                .usage()
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
            {
                return FramebufferStatus::Unsupported;
            }
            if level >= texture.desc.levels.max(1) {
                return FramebufferStatus::IncompleteAttachment;
            }
            let e = texture.level_extent(level);
            extent = Some((e.width, e.height));
        }
        if let Some(id) = framebuffer.depth {
            let Some(texture) = self.textures.get(&id) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            if !texture.format.is_depth_stencil_format() {
                return FramebufferStatus::IncompleteAttachment;
            }
            let e = texture.level_extent(0);
            if extent.is_some_and(|c| c != (e.width, e.height)) {
                return FramebufferStatus::IncompleteDimensions;
            }
        }
        FramebufferStatus::Complete
    }

    fn bind_framebuffer(&mut self, fbo: Option<FboId>) {
        self.bound = fbo;
    }

    fn viewport(&mut self, rect: Rect2i) {
        self.viewport = rect;
    }

    fn scissor(&mut self, rect: Option<Rect2i>) {
        self.scissor = rect;
    }

    fn clear(&mut self, color: Vec4) {
        let Some(target) = self.pass_target() else {
            log::error!("clear with no colour attachment bound");
            return;
        };
        let program = BoundProgram {
            variant: CopyVariant::SimpleColor,
            uniforms: CopyUniforms {
                color_in: color,
                ..CopyUniforms::default()
            },
        };
        if self.scissor.is_some() {
            self.encode_draw(Primitive::ScreenTriangle, &program, target.extent, None);
        } else {
            self.encode_draw(Primitive::ScreenTriangle, &program, target.extent, Some(color));
        }
    }

    fn bind_texture(&mut self, unit: u32, id: Option<TexId>) {
        match id {
            Some(id) => {
                let _ = self.units.insert(unit, id);
            }
            None => {
                let _ = self.units.remove(&unit);
            }
        }
    }

    fn draw(&mut self, primitive: Primitive, program: &BoundProgram) {
        self.encode_draw(primitive, program, self.viewport, None);
    }

    fn read_pixels(&mut self, rect: Rect2i) -> Vec<u8> {
        let len = (rect.size.x.max(0) * rect.size.y.max(0) * 4) as usize;
        let Some(target) = self.pass_target() else {
            return vec![0; len];
        };
        let mut out = Vec::with_capacity(len);
        let texture = match (self.bound, target.color_texture) {
            (None, _) => Some((&self.screen, 0)),
            (Some(fbo), Some(id)) => self
                .framebuffers
                .get(&fbo)
                .and_then(|f| f.color)
                .and_then(|(_, level)| Some((self.textures.get(&id)?, level))),
            (Some(_), None) => None,
        };
        let region = target.extent.intersection(&rect);
        let stored = texture.filter(|_| region.has_area()).and_then(|(texture, level)| {
            let layout = storage_layout(texture.desc.format.internal)?;
            let swizzle = texture.swizzle;
            let bytes = self.read_level(texture, 0, level, region)?;
            let Layout::Pixel(stride) = layout.layout() else {
                return None;
            };
            let texels = bytes
                .chunks_exact(stride as usize)
                .map(|t| {
                    let c = pixel::decode(layout, t).unwrap_or(Vec4::ZERO);
                    match swizzle {
                        Swizzle::Alpha => Vec4::new(0.0, 0.0, 0.0, c.x),
                        _ => from_storage(swizzle, TransferFormat::Rgba, c),
                    }
                })
                .collect::<Vec<_>>();
            Some(texels)
        });

        for y in rect.position.y..rect.end().y {
            for x in rect.position.x..rect.end().x {
                let inside = x >= region.position.x
                    && y >= region.position.y
                    && x < region.end().x
                    && y < region.end().y;
                let texel = stored
                    .as_ref()
                    .filter(|_| inside)
                    .and_then(|texels| {
                        let i = (y - region.position.y) * region.size.x + (x - region.position.x);
                        texels.get(i as usize).copied()
                    })
                    .unwrap_or(Vec4::ZERO);
                let _ = pixel::encode(ImageFormat::Rgba8, texel, &mut out);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_params_match_the_shader_layout() {
        assert_eq!(size_of::<CopyParams>(), 128);
    }

    #[test]
    fn section_flag_only_for_quads() {
        let program = BoundProgram {
            variant: CopyVariant::CopySection,
            uniforms: CopyUniforms::default(),
        };
        let viewport = Rect2i::new(0, 0, 8, 8);
        let quad = CopyParams::new(Primitive::ScreenQuad, &program, viewport, None);
        let triangle = CopyParams::new(Primitive::ScreenTriangle, &program, viewport, None);
        assert_eq!(quad.flags & FLAG_SECTION, FLAG_SECTION);
        assert_eq!(triangle.flags & FLAG_SECTION, 0);
        assert_eq!(quad.mode, CopyVariant::CopySection.mode());
    }

    #[test]
    fn luminance_alpha_round_trips_through_storage() {
        let data = [10u8, 200, 30, 40];
        let stored = recode(&data, ImageFormat::La8, ImageFormat::Rg8, |c| {
            to_storage(Swizzle::LuminanceAlpha, c)
        })
        .unwrap();
        assert_eq!(stored, vec![10, 200, 30, 40]);
        let back = recode(&stored, ImageFormat::Rg8, ImageFormat::La8, |c| {
            from_storage(Swizzle::LuminanceAlpha, TransferFormat::LuminanceAlpha, c)
        })
        .unwrap();
        assert_eq!(back, data.to_vec());
    }
}
