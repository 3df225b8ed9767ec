//! Default audio device selection.
//!
//! A mode switch points the OS default playback and capture devices at
//! whatever the profile asks for, matched by case-insensitive substring
//! against the live endpoint names. A missing device is normal (a VR-only
//! microphone may simply be off) and is skipped, not an error.
//!
//! The audio subsystem itself can be broken on a given machine (driver or
//! compatibility issues). That state is sticky: the first initialization
//! failure latches [`Availability::Unavailable`] and every later call
//! short-circuits instead of retrying.

use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Playback endpoints (speakers, headsets).
    Output,
    /// Capture endpoints (microphones).
    Input,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Output => write!(f, "playback"),
            DeviceKind::Input => write!(f, "capture"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AudioError {
    /// No active endpoint matched the requested fragment. Non-fatal.
    #[error("no {kind} device matches \"{fragment}\"")]
    NotFound { kind: DeviceKind, fragment: String },
    /// The audio subsystem could not be initialized. Sticky.
    #[error("audio subsystem unavailable")]
    Unavailable,
    /// The subsystem works but an operation failed.
    #[error("audio subsystem error: {0}")]
    Backend(String),
}

/// One live endpoint as presented by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Opaque OS device id, used to set the default.
    pub id: String,
    /// Full display name, e.g. "Speakers (H5) 2.0".
    pub full_name: String,
    /// Short device description, e.g. "Speakers".
    pub short_name: String,
}

/// First endpoint whose full or short name contains `fragment`,
/// case-insensitively. Ties break in enumeration order, which is OS-defined
/// and not guaranteed stable.
pub fn first_match<'a>(endpoints: &'a [Endpoint], fragment: &str) -> Option<&'a Endpoint> {
    let needle = fragment.to_lowercase();
    endpoints.iter().find(|e| {
        e.full_name.to_lowercase().contains(&needle)
            || e.short_name.to_lowercase().contains(&needle)
    })
}

/// Surface the engine drives. The real implementation is [`SystemAudio`];
/// tests substitute a mock.
pub trait AudioControl {
    /// Make the first endpoint matching `fragment` the OS default device and
    /// default communications device for `kind`. Returns the device's full
    /// name on success.
    fn set_default(&self, kind: DeviceKind, fragment: &str) -> Result<String, AudioError>;

    /// Full names of the active endpoints of `kind`, in enumeration order.
    fn device_names(&self, kind: DeviceKind) -> Result<Vec<String>, AudioError>;

    /// Full name of the current default endpoint of `kind`.
    fn current_default(&self, kind: DeviceKind) -> Result<String, AudioError>;
}

/// Cached capability of the OS audio subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Not probed yet.
    Unknown,
    Available,
    /// Initialization failed once; never retried.
    Unavailable,
}

/// The OS-backed selector. On non-Windows builds the backend reports
/// permanently unavailable; everything else in the crate still works.
pub struct SystemAudio {
    availability: Mutex<Availability>,
}

impl SystemAudio {
    pub fn new() -> Self {
        SystemAudio {
            availability: Mutex::new(Availability::Unknown),
        }
    }

    pub fn availability(&self) -> Availability {
        *self.availability.lock()
    }

    /// Run `op`, latching the unavailable state on initialization failure.
    /// Any other outcome (including "device not found") proves the subsystem
    /// is alive.
    fn with_backend<T>(
        &self,
        op: impl FnOnce() -> Result<T, AudioError>,
    ) -> Result<T, AudioError> {
        if *self.availability.lock() == Availability::Unavailable {
            return Err(AudioError::Unavailable);
        }

        match op() {
            Err(AudioError::Unavailable) => {
                tracing::warn!("audio subsystem failed to initialize; disabling audio control");
                *self.availability.lock() = Availability::Unavailable;
                Err(AudioError::Unavailable)
            }
            result => {
                *self.availability.lock() = Availability::Available;
                result
            }
        }
    }
}

impl Default for SystemAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioControl for SystemAudio {
    fn set_default(&self, kind: DeviceKind, fragment: &str) -> Result<String, AudioError> {
        self.with_backend(|| {
            let endpoints = platform::enumerate(kind)?;
            let endpoint =
                first_match(&endpoints, fragment).ok_or_else(|| AudioError::NotFound {
                    kind,
                    fragment: fragment.to_string(),
                })?;

            platform::set_default(&endpoint.id)?;
            tracing::info!(device = %endpoint.full_name, %kind, "default device set");
            Ok(endpoint.full_name.clone())
        })
    }

    fn device_names(&self, kind: DeviceKind) -> Result<Vec<String>, AudioError> {
        self.with_backend(|| {
            Ok(platform::enumerate(kind)?
                .into_iter()
                .map(|e| e.full_name)
                .collect())
        })
    }

    fn current_default(&self, kind: DeviceKind) -> Result<String, AudioError> {
        self.with_backend(|| platform::current_default(kind))
    }
}

#[cfg(windows)]
mod platform {
    //! CoreAudio backend. Enumeration goes through IMMDeviceEnumerator; the
    //! default is set through IPolicyConfig, the undocumented interface every
    //! device-switching utility uses (its layout below is the well-known one).

    use super::{AudioError, DeviceKind, Endpoint};
    use std::ffi::c_void;
    use windows::core::{interface, GUID, HRESULT, IUnknown, IUnknown_Vtbl, PCWSTR};
    use windows::Win32::Devices::FunctionDiscovery::{
        PKEY_Device_DeviceDesc, PKEY_Device_FriendlyName,
    };
    use windows::Win32::Media::Audio::{
        eCapture, eCommunications, eConsole, eMultimedia, eRender, EDataFlow, ERole, IMMDevice,
        IMMDeviceEnumerator, MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
    };
    use windows::Win32::System::Com::{
        CoCreateInstance, CoInitializeEx, CoTaskMemFree, CLSCTX_ALL, COINIT_MULTITHREADED,
        STGM_READ,
    };
    use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;

    #[interface("f8679f50-850a-41cf-9c72-430f290290c8")]
    unsafe trait IPolicyConfig: IUnknown {
        fn GetMixFormat(&self, device_id: PCWSTR, format: *mut *mut c_void) -> HRESULT;
        fn GetDeviceFormat(
            &self,
            device_id: PCWSTR,
            default: i32,
            format: *mut *mut c_void,
        ) -> HRESULT;
        fn ResetDeviceFormat(&self, device_id: PCWSTR) -> HRESULT;
        fn SetDeviceFormat(
            &self,
            device_id: PCWSTR,
            endpoint_format: *mut c_void,
            mix_format: *mut c_void,
        ) -> HRESULT;
        fn GetProcessingPeriod(
            &self,
            device_id: PCWSTR,
            default: i32,
            default_period: *mut i64,
            min_period: *mut i64,
        ) -> HRESULT;
        fn SetProcessingPeriod(&self, device_id: PCWSTR, period: *mut i64) -> HRESULT;
        fn GetShareMode(&self, device_id: PCWSTR, mode: *mut c_void) -> HRESULT;
        fn SetShareMode(&self, device_id: PCWSTR, mode: *mut c_void) -> HRESULT;
        fn GetPropertyValue(
            &self,
            device_id: PCWSTR,
            fx_store: i32,
            key: *const c_void,
            value: *mut c_void,
        ) -> HRESULT;
        fn SetPropertyValue(
            &self,
            device_id: PCWSTR,
            fx_store: i32,
            key: *const c_void,
            value: *const c_void,
        ) -> HRESULT;
        fn SetDefaultEndpoint(&self, device_id: PCWSTR, role: ERole) -> HRESULT;
        fn SetEndpointVisibility(&self, device_id: PCWSTR, visible: i32) -> HRESULT;
    }

    const POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

    fn data_flow(kind: DeviceKind) -> EDataFlow {
        match kind {
            DeviceKind::Output => eRender,
            DeviceKind::Input => eCapture,
        }
    }

    fn backend(e: windows::core::Error) -> AudioError {
        AudioError::Backend(e.message().to_string())
    }

    pub fn enumerate(kind: DeviceKind) -> Result<Vec<Endpoint>, AudioError> {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);

            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(|_| AudioError::Unavailable)?;

            let collection = enumerator
                .EnumAudioEndpoints(data_flow(kind), DEVICE_STATE_ACTIVE)
                .map_err(backend)?;
            let count = collection.GetCount().map_err(backend)?;

            let mut endpoints = Vec::with_capacity(count as usize);
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = device_id(&device) else {
                    continue;
                };

                endpoints.push(Endpoint {
                    id,
                    full_name: read_property(&device, &PKEY_Device_FriendlyName),
                    short_name: read_property(&device, &PKEY_Device_DeviceDesc),
                });
            }

            Ok(endpoints)
        }
    }

    pub fn current_default(kind: DeviceKind) -> Result<String, AudioError> {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);

            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(|_| AudioError::Unavailable)?;

            let device = enumerator
                .GetDefaultAudioEndpoint(data_flow(kind), eMultimedia)
                .map_err(backend)?;

            Ok(read_property(&device, &PKEY_Device_FriendlyName))
        }
    }

    /// Make `id` the default endpoint for every role, covering both the
    /// plain default and the communications default.
    pub fn set_default(id: &str) -> Result<(), AudioError> {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);

            let policy: IPolicyConfig =
                CoCreateInstance(&POLICY_CONFIG_CLIENT, None, CLSCTX_ALL)
                    .map_err(|_| AudioError::Unavailable)?;

            let wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
            for role in [eConsole, eMultimedia, eCommunications] {
                policy
                    .SetDefaultEndpoint(PCWSTR(wide.as_ptr()), role)
                    .ok()
                    .map_err(backend)?;
            }

            Ok(())
        }
    }

    fn device_id(device: &IMMDevice) -> Option<String> {
        unsafe {
            let pwstr = device.GetId().ok()?;
            let id = pwstr.to_string().ok();
            CoTaskMemFree(Some(pwstr.as_ptr() as *const c_void));
            id
        }
    }

    fn read_property(device: &IMMDevice, key: &PROPERTYKEY) -> String {
        unsafe {
            let Ok(store) = device.OpenPropertyStore(STGM_READ) else {
                return String::new();
            };
            let Ok(value) = store.GetValue(key) else {
                return String::new();
            };

            let pwsz = value.Anonymous.Anonymous.Anonymous.pwszVal;
            if pwsz.is_null() {
                String::new()
            } else {
                pwsz.to_string().unwrap_or_default()
            }
        }
    }
}

#[cfg(not(windows))]
mod platform {
    //! Stub backend for non-Windows builds: the subsystem is permanently
    //! unavailable, which exercises the same sticky-failure path the spec
    //! requires for broken drivers.

    use super::{AudioError, DeviceKind, Endpoint};

    pub fn enumerate(_kind: DeviceKind) -> Result<Vec<Endpoint>, AudioError> {
        Err(AudioError::Unavailable)
    }

    pub fn current_default(_kind: DeviceKind) -> Result<String, AudioError> {
        Err(AudioError::Unavailable)
    }

    pub fn set_default(_id: &str) -> Result<(), AudioError> {
        Err(AudioError::Unavailable)
    }
}
