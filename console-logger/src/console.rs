use nu_ansi_term::Color::{Cyan, Green, Red, Yellow};

/// Print a section header on console, preceded by an empty line.
pub fn header(message: &str) {
    println!("\n{}", Cyan.bold().paint(message));
}

/// Print info on console.
pub fn info(message: &str) {
    println!("{}", Cyan.italic().paint(message));
}

/// Print info on console, followed by the data it refers to.
pub fn info_with(message: &str, data: &str) {
    println!(
        "{}\n  {}",
        Cyan.italic().paint(message),
        Cyan.bold().paint(data)
    );
}

/// Print warning on console.
pub fn warn(message: &str, data: &str) {
    println!(
        "{} \n {} ",
        Yellow.bold().italic().paint(message),
        Red.bold().italic().paint(data)
    );
}

/// Print error on console.
pub fn error(message: &str, data: &str) {
    eprintln!(
        "{} \n {} ",
        Red.bold().paint(message),
        Red.italic().paint(data)
    );
}

/// Print a starred note block on console, one line per entry.
pub fn note(lines: &[&str]) {
    println!("\n{}", Yellow.bold().paint("* NOTE"));
    for line in lines {
        println!("{}", Yellow.paint(format!("* {line}")));
    }
}

/// Print a shell command the operator is expected to run, indented.
pub fn command(cmd: &str) {
    println!("\n  {}", Green.bold().paint(cmd));
}

/// Print a horizontal separator.
pub fn separator() {
    println!("\n{}", "-".repeat(78));
}
