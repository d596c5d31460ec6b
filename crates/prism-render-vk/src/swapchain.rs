// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain: negotiation policy, construction and teardown.
//!
//! Built in two phases. [`Swapchain::build`] creates the swapchain, one
//! colour view per image and the depth target. Framebuffers need a render
//! pass, so they are attached afterwards by [`Swapchain::bind_framebuffers`].

use crate::error::{RenderError, RenderResult};
use crate::gpu::{Gpu, GpuImage, ImageDesc, QueueFamilyIndices, SwapchainDesc};
use crate::unwind::Unwind;
use ash::vk;
use prism_render::RenderSize;
use tracing::{debug, info};

/// Surface properties, re-queried before every (re)build.
#[derive(Clone, Debug)]
pub struct SwapchainInfo {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainInfo {
    pub fn populate<G: Gpu + ?Sized>(gpu: &G) -> RenderResult<Self> {
        let capabilities = gpu.surface_capabilities()?;
        let formats = gpu.surface_formats()?;
        if formats.is_empty() {
            return Err(RenderError::NoSurfaceFormats);
        }
        let present_modes = gpu.present_modes()?;
        if present_modes.is_empty() {
            return Err(RenderError::NoPresentModes);
        }
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// B8G8R8A8_SRGB in the sRGB non-linear colour space, else whatever the
/// surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Mailbox when offered; FIFO otherwise (always supported).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, unless it reports the `u32::MAX` sentinel
/// meaning "you pick"; then the drawable size clamped into [min, max].
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: drawable.width.clamp(min.width, max.width.max(min.width)),
        height: drawable.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn choose_sharing(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics != families.present {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// Resolves every negotiation decision for one build.
pub fn describe(
    info: &SwapchainInfo,
    families: QueueFamilyIndices,
    drawable: RenderSize,
) -> RenderResult<SwapchainDesc> {
    let surface_format =
        choose_surface_format(&info.formats).ok_or(RenderError::NoSurfaceFormats)?;
    let (sharing_mode, queue_family_indices) = choose_sharing(families);
    Ok(SwapchainDesc {
        min_image_count: choose_image_count(&info.capabilities),
        surface_format,
        extent: choose_extent(&info.capabilities, drawable),
        present_mode: choose_present_mode(&info.present_modes),
        pre_transform: choose_pre_transform(&info.capabilities),
        sharing_mode,
        queue_family_indices,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthTarget {
    pub image: GpuImage,
    pub view: vk::ImageView,
}

#[derive(Clone, Debug)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub depth: DepthTarget,
    /// Empty until [`Swapchain::bind_framebuffers`] runs.
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    /// Phase one: swapchain, images, colour views and depth target. No
    /// framebuffers. On failure only objects created here are destroyed.
    pub fn build<G: Gpu + ?Sized>(
        gpu: &G,
        info: &SwapchainInfo,
        drawable: RenderSize,
    ) -> RenderResult<Self> {
        let desc = describe(info, gpu.queue_families(), drawable)?;
        let mut unwind = Unwind::new();

        let handle = gpu.create_swapchain(&desc)?;
        unwind.push("swapchain", move || gpu.destroy_swapchain(handle));

        let images = gpu.swapchain_images(handle)?;
        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let view = gpu.create_image_view(
                image,
                desc.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            unwind.push("swapchain image view", move || gpu.destroy_image_view(view));
            views.push(view);
        }

        let depth_format = gpu.depth_format();
        let depth_image = gpu.create_image(&ImageDesc {
            extent: desc.extent,
            format: depth_format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        })?;
        unwind.push("depth image", move || gpu.destroy_image(depth_image));
        let depth_view =
            gpu.create_image_view(depth_image.image, depth_format, vk::ImageAspectFlags::DEPTH)?;
        unwind.disarm();

        info!(
            "swapchain: format {:?} / {:?}, present mode {:?}, extent {}x{}, images {} (min request {})",
            desc.surface_format.format,
            desc.surface_format.color_space,
            desc.present_mode,
            desc.extent.width,
            desc.extent.height,
            images.len(),
            desc.min_image_count,
        );

        Ok(Self {
            handle,
            surface_format: desc.surface_format,
            present_mode: desc.present_mode,
            extent: desc.extent,
            images,
            views,
            depth: DepthTarget {
                image: depth_image,
                view: depth_view,
            },
            framebuffers: Vec::new(),
        })
    }

    /// Phase three (after the render pass exists): one framebuffer per
    /// image, colour view + shared depth view. Replaces any existing set.
    pub fn bind_framebuffers<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
    ) -> RenderResult<()> {
        self.destroy_framebuffers(gpu);
        let mut unwind = Unwind::new();
        let mut framebuffers = Vec::with_capacity(self.views.len());
        for &view in &self.views {
            let fb = gpu.create_framebuffer(render_pass, &[view, self.depth.view], self.extent)?;
            unwind.push("framebuffer", move || gpu.destroy_framebuffer(fb));
            framebuffers.push(fb);
        }
        unwind.disarm();
        debug!("bound {} framebuffers", framebuffers.len());
        self.framebuffers = framebuffers;
        Ok(())
    }

    pub fn destroy_framebuffers<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for fb in self.framebuffers.drain(..) {
            gpu.destroy_framebuffer(fb);
        }
    }

    /// Framebuffers, depth, views, then the swapchain itself. Render pass and
    /// pipeline are not touched.
    pub fn destroy<G: Gpu + ?Sized>(mut self, gpu: &G) {
        self.destroy_framebuffers(gpu);
        gpu.destroy_image_view(self.depth.view);
        gpu.destroy_image(self.depth.image);
        for view in self.views.drain(..) {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_swapchain(self.handle);
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RenderPassDesc;
    use crate::mock::{Kind, MockGpu, Op};

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn extent_uses_current_when_fixed() {
        let c = caps((1000, 900), (1, 1), (4096, 4096));
        let e = choose_extent(&c, RenderSize::new(10, 10));
        assert_eq!((e.width, e.height), (1000, 900));
    }

    #[test]
    fn extent_clamps_drawable_when_variable() {
        let c = caps((u32::MAX, u32::MAX), (100, 100), (2000, 2000));
        let e = choose_extent(&c, RenderSize::new(5000, 50));
        assert_eq!((e.width, e.height), (2000, 100));
        let e = choose_extent(&c, RenderSize::new(640, 480));
        assert_eq!((e.width, e.height), (640, 480));
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX]), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::IMMEDIATE, P::FIFO]), P::FIFO);
        assert_eq!(choose_present_mode(&[P::IMMEDIATE]), P::FIFO);
        assert_eq!(choose_present_mode(&[P::FIFO_RELAXED, P::FIFO]), P::FIFO);
    }

    #[test]
    fn surface_format_prefers_bgra_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[unorm]), Some(unorm));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        c.min_image_count = 2;
        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn sharing_follows_family_split() {
        let same = QueueFamilyIndices {
            graphics: 1,
            present: 1,
        };
        assert_eq!(choose_sharing(same), (vk::SharingMode::EXCLUSIVE, vec![]));
        let split = QueueFamilyIndices {
            graphics: 0,
            present: 2,
        };
        assert_eq!(
            choose_sharing(split),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }

    #[test]
    fn populate_rejects_empty_lists() {
        let gpu = MockGpu::new();
        gpu.set_present_modes(vec![]);
        assert!(matches!(
            SwapchainInfo::populate(&gpu),
            Err(RenderError::NoPresentModes)
        ));
        gpu.set_formats(vec![]);
        assert!(matches!(
            SwapchainInfo::populate(&gpu),
            Err(RenderError::NoSurfaceFormats)
        ));
    }

    #[test]
    fn build_creates_views_and_depth_but_no_framebuffers() {
        let gpu = MockGpu::new();
        let info = SwapchainInfo::populate(&gpu).unwrap();
        let sc = Swapchain::build(&gpu, &info, RenderSize::new(800, 600)).unwrap();
        assert_eq!(sc.images.len(), 3);
        assert_eq!(gpu.live(Kind::Swapchain), 1);
        assert_eq!(gpu.live(Kind::ImageView), 4);
        assert_eq!(gpu.live(Kind::Image), 1);
        assert_eq!(gpu.live(Kind::Framebuffer), 0);
        assert_eq!(sc.present_mode, vk::PresentModeKHR::MAILBOX);
        sc.destroy(&gpu);
        assert_eq!(gpu.total_live(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn build_failure_unwinds_partial_views() {
        let gpu = MockGpu::new();
        let info = SwapchainInfo::populate(&gpu).unwrap();
        gpu.fail_nth(Op::CreateImageView, 2, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let err = Swapchain::build(&gpu, &info, RenderSize::new(800, 600)).unwrap_err();
        assert!(matches!(err, RenderError::ImageView(_)));
        assert_eq!(gpu.total_live(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn framebuffer_failure_unwinds_only_framebuffers() {
        let gpu = MockGpu::new();
        let info = SwapchainInfo::populate(&gpu).unwrap();
        let mut sc = Swapchain::build(&gpu, &info, RenderSize::new(800, 600)).unwrap();
        let rp = gpu
            .create_render_pass(&RenderPassDesc {
                color: vk::Format::B8G8R8A8_SRGB,
                depth: vk::Format::D32_SFLOAT,
                dependency: crate::pipeline::frame_dependency(),
            })
            .unwrap();
        gpu.fail_nth(Op::CreateFramebuffer, 1, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(sc.bind_framebuffers(&gpu, rp).is_err());
        assert_eq!(gpu.live(Kind::Framebuffer), 0);
        assert_eq!(gpu.live(Kind::ImageView), 4);

        sc.bind_framebuffers(&gpu, rp).unwrap();
        assert_eq!(gpu.live(Kind::Framebuffer), 3);
        // rebinding replaces instead of leaking
        sc.bind_framebuffers(&gpu, rp).unwrap();
        assert_eq!(gpu.live(Kind::Framebuffer), 3);

        sc.destroy(&gpu);
        gpu.destroy_render_pass(rp);
        assert_eq!(gpu.total_live(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn concurrent_sharing_when_families_differ() {
        let gpu = MockGpu::new();
        gpu.set_families(QueueFamilyIndices {
            graphics: 0,
            present: 1,
        });
        let info = SwapchainInfo::populate(&gpu).unwrap();
        let sc = Swapchain::build(&gpu, &info, RenderSize::new(800, 600)).unwrap();
        let desc = gpu.swapchain_descs().pop().unwrap();
        assert_eq!(desc.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(desc.queue_family_indices, vec![0, 1]);
        sc.destroy(&gpu);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }
}
