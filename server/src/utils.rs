use rand::Rng;

/// Opaque light green (ARGB `0xFF90EE90`) used for every virus.
pub const VIRUS_COLOR: i32 = 0xFF90_EE90_u32 as i32;

// Generate a bright, visible ARGB color
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    !(rng.gen::<i32>() & 0x00f0_f0f0)
}
