//! Framebuffer Tests
//!
//! Tests for:
//! - Mip chain arithmetic
//! - Attachment bookkeeping and buffer-type collisions
//! - Activation at a mip level and cubemap face
//! - Blits and clears
//! - Resource release on drop

use quark::core::headless::Command;
use quark::core::{AttachmentPoint, BufferBits, RenderTarget, Viewport};
use quark::resources::texture::{calculate_mip_level, calculate_next_mip, calculate_num_mips};
use quark::resources::{AttachmentTarget, ImageSize, MipGeneration, TextureParams};
use quark::{BufferType, Context, ContextSettings, Framebuffer, HeadlessBackend, QuarkError};

fn headless() -> Context {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::headless(ContextSettings::default())
}

fn mipmapped() -> TextureParams {
    TextureParams {
        generate_mips: MipGeneration::Always,
        ..TextureParams::bilinear_clamped()
    }
}

// ============================================================================
// Mip Arithmetic
// ============================================================================

#[test]
fn test_num_mips_follows_largest_side() {
    assert_eq!(calculate_num_mips(1, 1), 1);
    assert_eq!(calculate_num_mips(2, 2), 2);
    assert_eq!(calculate_num_mips(2, 1), 2);
    assert_eq!(calculate_num_mips(256, 256), 9);
    assert_eq!(calculate_num_mips(800, 600), 10);
    assert_eq!(calculate_num_mips(1, 1024), 11);
}

#[test]
fn test_next_mip_halves_and_clamps() {
    let next = calculate_next_mip(ImageSize { width: 5, height: 1 });
    assert_eq!(next, ImageSize { width: 2, height: 1 });

    let next = calculate_next_mip(ImageSize { width: 1, height: 1 });
    assert_eq!(next, ImageSize { width: 1, height: 1 });
}

#[test]
fn test_mip_level_sizes() {
    assert_eq!(calculate_mip_level(256, 1024, 1), ImageSize { width: 128, height: 512 });
    assert_eq!(calculate_mip_level(84, 26, 1), ImageSize { width: 42, height: 13 });
}

#[test]
fn test_mip_level_matches_repeated_halving() {
    let mut size = ImageSize { width: 800, height: 600 };
    for level in 0..calculate_num_mips(800, 600) {
        assert_eq!(calculate_mip_level(800, 600, level), size, "level {level}");
        size = calculate_next_mip(size);
    }
}

#[test]
fn test_mip_count_respects_cap() {
    let capped = TextureParams {
        max_num_mips: Some(5),
        ..mipmapped()
    };
    assert_eq!(capped.mip_count(256, 256, MipGeneration::Always), 5);
    assert_eq!(mipmapped().mip_count(256, 256, MipGeneration::Always), 9);
    assert_eq!(
        TextureParams::default().mip_count(256, 256, MipGeneration::Always),
        1
    );
}

// ============================================================================
// Attachments
// ============================================================================

#[test]
fn test_color_attachments_get_sequential_indices() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 64, 64)?;
    let first = fb.attach_texture(BufferType::ColorHdrAlpha)?;
    let second = fb.attach_texture(BufferType::ColorHdrAlpha)?;

    assert_eq!(first.color_attachment_index(), Some(0));
    assert_eq!(second.color_attachment_index(), Some(1));
    assert_eq!(fb.draw_buffers().as_slice(), &[0, 1]);

    let draw_buffers = ctx
        .inspect(|h: &HeadlessBackend| h.framebuffer(fb.id()).map(|f| f.draw_buffers.clone()))
        .flatten()
        .expect("framebuffer exists");
    assert_eq!(draw_buffers, vec![0, 1]);
    Ok(())
}

#[test]
fn test_depth_attachments_collide() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 64, 64)?;
    fb.attach_renderbuffer(BufferType::Depth)?;

    let err = fb.attach_texture(BufferType::DepthAndStencil).unwrap_err();
    assert!(
        matches!(err, QuarkError::BufferTypeCollision(BufferType::DepthAndStencil)),
        "got {err}"
    );
    assert_eq!(fb.attachments().len(), 1, "failed attach must not be recorded");
    Ok(())
}

#[test]
fn test_second_depth_attachment_collides() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 64, 64)?;
    fb.attach_texture(BufferType::Depth)?;

    let err = fb.attach_texture(BufferType::Depth).unwrap_err();
    assert!(
        matches!(err, QuarkError::BufferTypeCollision(BufferType::Depth)),
        "got {err}"
    );
    let err = fb.attach_renderbuffer(BufferType::Depth).unwrap_err();
    assert!(
        matches!(err, QuarkError::BufferTypeCollision(BufferType::Depth)),
        "got {err}"
    );
    assert_eq!(fb.attachments().len(), 1);
    Ok(())
}

#[test]
fn test_stencil_after_depth_is_allowed() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 64, 64)?;
    fb.attach_renderbuffer(BufferType::Depth)?;
    fb.attach_renderbuffer(BufferType::Stencil)?;

    assert!(fb.has_depth_attachment());
    assert!(fb.has_stencil_attachment());
    assert!(!fb.has_color_attachment());
    assert!(fb.draw_buffers().is_empty());
    Ok(())
}

#[test]
fn test_attachment_lookup_by_type() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 32, 16)?;
    fb.attach_texture(BufferType::Color)?;
    fb.attach_renderbuffer(BufferType::DepthAndStencil)?;

    let depth = fb.attachment(BufferType::DepthAndStencil)?;
    assert_eq!(depth.target(), AttachmentTarget::Renderbuffer);
    assert_eq!(depth.size(), ImageSize { width: 32, height: 16 });
    assert!(depth.as_texture().is_err(), "renderbuffers cannot be sampled");

    assert!(matches!(
        fb.attachment(BufferType::Grayscale),
        Err(QuarkError::AttachmentNotFound(BufferType::Grayscale))
    ));

    let points = ctx
        .inspect(|h: &HeadlessBackend| {
            h.framebuffer(fb.id())
                .map(|f| f.attachments.iter().map(|(p, _)| *p).collect::<Vec<_>>())
        })
        .flatten()
        .expect("framebuffer exists");
    assert_eq!(points, vec![AttachmentPoint::Color(0), AttachmentPoint::DepthStencil]);
    Ok(())
}

#[test]
fn test_mipmapped_attachment_allocates_full_chain() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 256, 256)?;
    let attachment = fb.attach_texture_with_params(BufferType::ColorHdrAlpha, &mipmapped())?;
    assert_eq!(attachment.num_mips(), 9);

    let texture = attachment.as_texture()?;
    let mip_levels = ctx
        .inspect(|h: &HeadlessBackend| h.texture(texture.id()).map(|t| t.desc.num_mips))
        .flatten()
        .expect("texture exists");
    assert_eq!(mip_levels, 9);
    Ok(())
}

#[test]
fn test_renderbuffer_cannot_be_cubemap() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 64, 64)?;
    let err = fb.attach_renderbuffer(BufferType::ColorCubemapHdr).unwrap_err();
    assert!(matches!(err, QuarkError::InvalidBufferType { .. }), "got {err}");
    Ok(())
}

// ============================================================================
// Activation
// ============================================================================

#[test]
fn test_activate_at_mip_sets_viewport_to_mip_size() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 256, 256)?;
    fb.attach_texture_with_params(BufferType::ColorHdrAlpha, &mipmapped())?;

    fb.activate_at(3, None)?;
    let (viewport, target) = ctx
        .inspect(|h: &HeadlessBackend| (h.viewport(), h.render_target()))
        .expect("headless backend");
    assert_eq!(viewport, Viewport::new(32, 32));
    assert_eq!(
        target,
        RenderTarget::Framebuffer {
            id: fb.id(),
            mip: 3,
            face: None
        }
    );

    fb.deactivate();
    let (viewport, target) = ctx
        .inspect(|h: &HeadlessBackend| (h.viewport(), h.render_target()))
        .expect("headless backend");
    assert_eq!(target, RenderTarget::Default);
    assert_eq!(viewport, Viewport::new(800, 600));
    Ok(())
}

#[test]
fn test_activate_beyond_mip_chain_fails() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 256, 256)?;
    fb.attach_texture_with_params(BufferType::ColorHdrAlpha, &mipmapped())?;

    let err = fb.activate_at(9, None).unwrap_err();
    assert!(
        matches!(err, QuarkError::MipLevelOutOfRange { level: 9, num_mips: 9 }),
        "got {err}"
    );
    Ok(())
}

#[test]
fn test_cubemap_face_bounds() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 16, 16)?;
    fb.attach_texture(BufferType::ColorCubemapHdr)?;

    for face in 0..6 {
        fb.activate_at(0, Some(face))?;
    }
    assert!(matches!(
        fb.activate_at(0, Some(6)),
        Err(QuarkError::InvalidCubemapFace(6))
    ));
    Ok(())
}

#[test]
fn test_face_on_flat_texture_fails() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 16, 16)?;
    fb.attach_texture(BufferType::ColorHdr)?;

    assert!(matches!(
        fb.activate_at(0, Some(2)),
        Err(QuarkError::NotACubemap(2))
    ));
    Ok(())
}

#[test]
fn test_renderbuffer_rejects_mip_and_face() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 64, 64)?;
    fb.attach_texture_with_params(BufferType::ColorHdrAlpha, &mipmapped())?;
    fb.attach_renderbuffer(BufferType::DepthAndStencil)?;

    fb.activate()?;
    let err = fb.activate_at(1, None).unwrap_err();
    assert!(
        matches!(err, QuarkError::RenderbufferTarget { mip: 1, face: -1 }),
        "got {err}"
    );
    Ok(())
}

// ============================================================================
// Clears & Blits
// ============================================================================

#[test]
fn test_clear_covers_present_planes_only() -> anyhow::Result<()> {
    let ctx = headless();
    let mut fb = Framebuffer::new(&ctx, 64, 64)?;
    fb.attach_texture(BufferType::ColorHdr)?;
    fb.attach_renderbuffer(BufferType::Depth)?;

    fb.activate()?;
    fb.clear();

    let bits = ctx
        .inspect(|h: &HeadlessBackend| {
            h.commands().iter().rev().find_map(|c| match c {
                Command::Clear { bits, .. } => Some(*bits),
                _ => None,
            })
        })
        .flatten()
        .expect("clear recorded");
    assert_eq!(bits, BufferBits::COLOR | BufferBits::DEPTH);
    Ok(())
}

#[test]
fn test_blit_records_source_and_destination() -> anyhow::Result<()> {
    let ctx = headless();
    let mut source = Framebuffer::new(&ctx, 64, 64)?;
    source.attach_texture(BufferType::ColorHdrAlpha)?;
    let mut dest = Framebuffer::new(&ctx, 32, 32)?;
    dest.attach_texture(BufferType::ColorHdrAlpha)?;

    source.blit(&dest, BufferBits::COLOR)?;
    source.blit_to_default(BufferBits::COLOR)?;

    let blits: Vec<_> = ctx
        .inspect(|h: &HeadlessBackend| {
            h.commands()
                .iter()
                .filter_map(|c| match c {
                    Command::Blit { source, dest, .. } => Some((*source, *dest)),
                    _ => None,
                })
                .collect()
        })
        .expect("headless backend");
    assert_eq!(
        blits,
        vec![(Some(source.id()), Some(dest.id())), (Some(source.id()), None)]
    );
    Ok(())
}

#[test]
fn test_depth_blit_requires_equal_sizes() -> anyhow::Result<()> {
    let ctx = headless();
    let mut source = Framebuffer::new(&ctx, 64, 64)?;
    source.attach_renderbuffer(BufferType::Depth)?;
    let mut dest = Framebuffer::new(&ctx, 32, 32)?;
    dest.attach_renderbuffer(BufferType::Depth)?;

    let err = source.blit(&dest, BufferBits::DEPTH).unwrap_err();
    assert!(matches!(err, QuarkError::BlitUnsupported(_)), "got {err}");
    Ok(())
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn test_drop_releases_framebuffer_and_renderbuffers() -> anyhow::Result<()> {
    let ctx = headless();
    let live = |ctx: &Context| {
        ctx.inspect(|h: &HeadlessBackend| h.live_resources())
            .expect("headless backend")
    };
    let (_, renderbuffers_before, framebuffers_before) = live(&ctx);

    {
        let mut fb = Framebuffer::new(&ctx, 64, 64)?;
        fb.attach_renderbuffer(BufferType::DepthAndStencil)?;
        let (_, renderbuffers, framebuffers) = live(&ctx);
        assert_eq!(renderbuffers, renderbuffers_before + 1);
        assert_eq!(framebuffers, framebuffers_before + 1);
    }

    let (_, renderbuffers, framebuffers) = live(&ctx);
    assert_eq!(renderbuffers, renderbuffers_before);
    assert_eq!(framebuffers, framebuffers_before);
    Ok(())
}
