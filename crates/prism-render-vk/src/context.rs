// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical-device choice and the logical device.
//!
//! Adapter qualification is split into a driver query (collected
//! into an `AdapterReport`) and pure selection functions, so the policy is
//! testable without a driver.

use crate::error::{RenderError, RenderResult};
use crate::gpu::QueueFamilyIndices;
use crate::unwind::Unwind;
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use prism_render::SurfaceProvider;
use raw_window_handle::RawDisplayHandle;
use std::collections::BTreeSet;
use std::ffi::{c_char, c_void, CStr};
use tracing::{debug, error, info, trace, warn};

const APP_NAME: &CStr = c"prism";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyReport {
    pub graphics: bool,
    pub present: bool,
}

/// What probing one physical device against the surface found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterReport {
    pub queue_families: Vec<QueueFamilyReport>,
    pub has_swapchain_ext: bool,
    pub format_count: usize,
    pub present_mode_count: usize,
}

/// First family with graphics, first family with present support.
pub fn find_queue_families(families: &[QueueFamilyReport]) -> Option<QueueFamilyIndices> {
    let graphics = families.iter().position(|f| f.graphics)?;
    let present = families.iter().position(|f| f.present)?;
    Some(QueueFamilyIndices {
        graphics: graphics as u32,
        present: present as u32,
    })
}

pub fn qualify_adapter(report: &AdapterReport) -> Option<QueueFamilyIndices> {
    if !report.has_swapchain_ext || report.format_count == 0 || report.present_mode_count == 0 {
        return None;
    }
    find_queue_families(&report.queue_families)
}

/// First qualifying adapter wins; no scoring.
pub fn select_adapter(reports: &[AdapterReport]) -> Option<(usize, QueueFamilyIndices)> {
    reports
        .iter()
        .enumerate()
        .find_map(|(i, r)| qualify_adapter(r).map(|q| (i, q)))
}

/// Sorted, deduplicated: one queue-create entry per distinct family.
pub fn unique_queue_families(indices: QueueFamilyIndices) -> Vec<u32> {
    [indices.graphics, indices.present]
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn choose_depth_format(supported: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&f| supported(f))
}

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(RenderError::NoMemoryType { type_bits, flags })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback struct for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: p_message is a NUL-terminated string owned by the loader.
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", ?types, "{msg}");
    } else {
        trace!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}

/// Validation layer plus debug-utils, only in debug builds and only when the
/// loader offers both.
fn validation_available(entry: &Entry) -> bool {
    if !cfg!(debug_assertions) {
        return false;
    }
    // SAFETY: plain loader queries.
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let exts = unsafe { entry.enumerate_instance_extension_properties(None) }.unwrap_or_default();
    let has_layer = layers
        .iter()
        .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
    let has_ext = exts
        .iter()
        .any(|e| e.extension_name_as_c_str() == Ok(debug_utils::NAME));
    if !has_layer || !has_ext {
        debug!("validation layer not available");
    }
    has_layer && has_ext
}

fn create_instance(entry: &Entry, display: RawDisplayHandle, validation: bool) -> RenderResult<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let required = ash_window::enumerate_required_extensions(display)
        .map_err(RenderError::InstanceExtensions)?;
    let mut extensions: Vec<*const c_char> = required.to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    // SAFETY: every pointer in create_info outlives the call.
    unsafe { entry.create_instance(&create_info, None) }.map_err(RenderError::Instance)
}

fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> RenderResult<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    // SAFETY: the callback is a plain function with no user data.
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .map_err(RenderError::Instance)?;
    Ok((loader, messenger))
}

fn query_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<AdapterReport, vk::Result> {
    // SAFETY: phys comes from enumerate_physical_devices on this instance and
    // surface was created from the same instance.
    unsafe {
        let families = instance.get_physical_device_queue_family_properties(phys);
        let mut queue_families = Vec::with_capacity(families.len());
        for (i, f) in families.iter().enumerate() {
            queue_families.push(QueueFamilyReport {
                graphics: f.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: surface_loader.get_physical_device_surface_support(phys, i as u32, surface)?,
            });
        }
        let has_swapchain_ext = instance
            .enumerate_device_extension_properties(phys)?
            .iter()
            .any(|e| e.extension_name_as_c_str() == Ok(swapchain::NAME));
        let format_count = surface_loader
            .get_physical_device_surface_formats(phys, surface)?
            .len();
        let present_mode_count = surface_loader
            .get_physical_device_surface_present_modes(phys, surface)?
            .len();
        Ok(AdapterReport {
            queue_families,
            has_swapchain_ext,
            format_count,
            present_mode_count,
        })
    }
}

fn adapter_name(instance: &Instance, phys: vk::PhysicalDevice) -> String {
    // SAFETY: phys is a handle from this instance.
    let props = unsafe { instance.get_physical_device_properties(phys) };
    props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_owned())
}

/// Owns the Vulkan instance, the presentation surface and the logical
/// device. Everything else the renderer creates is released before this.
pub struct DeviceContext {
    pub(crate) instance: Instance,
    pub(crate) debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) swapchain_loader: swapchain::Device,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) families: QueueFamilyIndices,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) depth_format: vk::Format,
    /// Max sampler anisotropy when the feature was enabled.
    pub(crate) anisotropy: Option<f32>,
    // Keeps the loader library mapped until after `destroy_instance`.
    _entry: Entry,
}

impl DeviceContext {
    // STRICT ORDER:
    // 1) loader, instance (WSI extensions, validation when available)
    // 2) surface FROM THIS INSTANCE
    // 3) debug messenger
    // 4) physical device + queue families queried AGAINST THIS SURFACE
    // 5) depth format, logical device, queues, swapchain loader
    // Each step registers its teardown; failure releases what exists so far.
    pub fn create(provider: &dyn SurfaceProvider) -> RenderResult<Self> {
        let display = provider
            .display_handle()
            .map_err(|e| RenderError::WindowHandle(e.to_string()))?
            .as_raw();
        let window = provider
            .window_handle()
            .map_err(|e| RenderError::WindowHandle(e.to_string()))?
            .as_raw();

        // SAFETY: loading the system Vulkan library has no other preconditions.
        let entry = unsafe { Entry::load() }.map_err(|e| RenderError::Loader(e.to_string()))?;
        let validation = validation_available(&entry);
        let instance = create_instance(&entry, display, validation)?;
        let mut unwind = Unwind::new();
        {
            let instance = instance.clone();
            // SAFETY: every child object is destroyed by earlier steps.
            unwind.push("instance", move || unsafe { instance.destroy_instance(None) });
        }

        let surface_loader = surface::Instance::new(&entry, &instance);
        // SAFETY: the handles come from a live window that outlives this call.
        let surface = unsafe { ash_window::create_surface(&entry, &instance, display, window, None) }
            .map_err(RenderError::Surface)?;
        {
            let loader = surface_loader.clone();
            unwind.push("surface", move || unsafe { loader.destroy_surface(surface, None) });
        }

        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok((loader, messenger)) => {
                    let l = loader.clone();
                    unwind.push("debug messenger", move || unsafe {
                        l.destroy_debug_utils_messenger(messenger, None)
                    });
                    Some((loader, messenger))
                }
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        // SAFETY: plain instance query.
        let physical = unsafe { instance.enumerate_physical_devices() }
            .map_err(RenderError::Instance)?;
        let reports: Vec<AdapterReport> = physical
            .iter()
            .map(|&phys| match query_adapter(&instance, &surface_loader, surface, phys) {
                Ok(report) => report,
                Err(e) => {
                    debug!(adapter = %adapter_name(&instance, phys), "adapter query failed: {e}");
                    AdapterReport::default()
                }
            })
            .collect();
        for (i, r) in reports.iter().enumerate() {
            if qualify_adapter(r).is_none() {
                debug!(adapter = %adapter_name(&instance, physical[i]), report = ?r, "adapter rejected");
            }
        }
        let (chosen, families) = select_adapter(&reports).ok_or(RenderError::NoPhysicalDevice)?;
        let physical_device = physical[chosen];
        info!(
            adapter = %adapter_name(&instance, physical_device),
            graphics = families.graphics,
            present = families.present,
            "adapter chosen"
        );

        let depth_format = choose_depth_format(|f| {
            // SAFETY: plain physical-device query.
            let props =
                unsafe { instance.get_physical_device_format_properties(physical_device, f) };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(RenderError::NoDepthFormat)?;

        // SAFETY: plain physical-device queries.
        let (supported, limits, memory_properties) = unsafe {
            (
                instance.get_physical_device_features(physical_device),
                instance.get_physical_device_properties(physical_device).limits,
                instance.get_physical_device_memory_properties(physical_device),
            )
        };
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: supported.sampler_anisotropy,
            geometry_shader: supported.geometry_shader,
            ..Default::default()
        };
        let anisotropy = (supported.sampler_anisotropy == vk::TRUE)
            .then_some(limits.max_sampler_anisotropy);

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_queue_families(families)
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();
        let device_exts = [swapchain::NAME.as_ptr()];
        let device_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        // SAFETY: every pointer in device_info outlives the call.
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(RenderError::DeviceCreate)?;

        // SAFETY: both families were requested with one queue each.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
            )
        };
        let swapchain_loader = swapchain::Device::new(&instance, &device);
        unwind.disarm();

        debug!(
            ?depth_format,
            anisotropy = ?anisotropy,
            geometry_shader = supported.geometry_shader == vk::TRUE,
            validation,
            "device ready"
        );

        Ok(Self {
            instance,
            debug,
            surface_loader,
            surface,
            physical_device,
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            families,
            memory_properties,
            depth_format,
            anisotropy,
            _entry: entry,
        })
    }

    pub fn memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> RenderResult<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags)
    }
}

// STRICT TEARDOWN ORDER:
// device (after idle) -> debug messenger -> surface -> instance.
// The renderer has already released everything created from the device.
impl Drop for DeviceContext {
    fn drop(&mut self) {
        // SAFETY: this is the last owner of every handle below.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device idle before destroy failed: {e}");
            }
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        debug!("device context destroyed");
    }
}
