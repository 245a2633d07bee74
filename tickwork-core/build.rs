use std::{env, fs::File, io::Write, path::Path};

fn main() {
    let out_dir = env::var("OUT_DIR").expect("Environment variable OUT_DIR not defined");
    let dest_path = Path::new(&out_dir).join("constants.rs");
    let mut f = File::create(&dest_path).expect("Could not create \"constants.rs\"");

    let frequency: u32 = match env::var("AVR_CPU_FREQUENCY_HZ") {
        Ok(frequency) => match frequency.parse() {
            Ok(freq) => freq,
            Err(_) => {
                println!("cargo:warning=Unable to parse AVR_CPU_FREQUENCY_HZ into u32, defaulting to 16MHz");
                16_000_000
            }
        },
        Err(_) => {
            println!("cargo:warning=AVR_CPU_FREQUENCY_HZ not found, defaulting to 16MHz");
            16_000_000
        }
    };

    let prescale: u32 = match env::var("AVR_TIMER_PRESCALE") {
        Ok(prescale) => match prescale.parse::<u32>() {
            Ok(1) => 1,
            Ok(8) => 8,
            Ok(64) => 64,
            Ok(other) => panic!("AVR_TIMER_PRESCALE must be 1, 8 or 64, got {}", other),
            Err(_) => panic!("Unable to parse AVR_TIMER_PRESCALE into u32"),
        },
        Err(_) => 8,
    };

    write!(
        &mut f,
        "/// Reflects contents of AVR_CPU_FREQUENCY_HZ environment variable (defaults to 16MHz)\n\
         pub const F_CPU: u32 = {};\n\
         /// Timer1 prescale divisor from AVR_TIMER_PRESCALE (1, 8 or 64; defaults to 8)\n\
         pub const PRESCALE: u32 = {};\n",
        frequency, prescale
    )
    .expect("Failed to write file");

    println!("cargo:rerun-if-env-changed=AVR_CPU_FREQUENCY_HZ");
    println!("cargo:rerun-if-env-changed=AVR_TIMER_PRESCALE");
}
