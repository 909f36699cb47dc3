use std::env;

fn main() {
    // Use: dump <file>
    // Example: dump 'authroot.stl'
    let path = env::args().nth(1).expect("usage: dump <file>");
    let data = std::fs::read(&path).expect("error: couldn't read file");

    let subjects = authroot_stl::parse(&data).expect("failed to validate CTL");

    for subject in subjects {
        println!("{} {}", subject.sha1_fingerprint, subject.friendly_name);
        if subject.microsoft_extended_key_usage != 0 {
            println!("\t EKUs: {:#06x}", subject.microsoft_extended_key_usage);
        }
        if let Some(disabled) = subject.disabled_date {
            println!("\t disabled: {disabled}");
        }
    }
}
