pub mod core {
    pub use wm_lib_core::*;
}

pub mod audio {
    pub use wm_lib_audio::*;
}
