use netlog::*;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ResultServerConfig::from_file(path)?,
        None => ResultServerConfig::new("127.0.0.1", 2042),
    };

    println!("🌀 netlog - Sending trace to {}", config.addr());

    let start = Instant::now();
    let Some(sender) = Sender::connect(&config, start) else {
        anyhow::bail!("result server {} is not reachable", config.addr());
    };

    // 1. Announce the traced process
    println!("\n1️⃣  Announcing process...");
    sender.log_new_process(std::process::id() as i64, 1, Some("/usr/bin/demo"))?;

    // 2. A few syscalls; each index is described on first use
    println!("2️⃣  Sending syscalls...");
    let calls: Vec<(&str, i64, Vec<(String, Value)>)> = vec![
        (
            "open",
            3,
            vec![
                ("filename".into(), Value::from("/etc/hostname")),
                ("flags".into(), Value::Int(0)),
            ],
        ),
        (
            "read",
            12,
            vec![
                ("fd".into(), Value::Int(3)),
                ("buf".into(), Value::from("sandbox-01\n")),
            ],
        ),
        ("close", 0, vec![("fd".into(), Value::Int(3))]),
        (
            "connect",
            0,
            vec![
                ("fd".into(), Value::Int(4)),
                ("addr".into(), Value::from("10.0.0.1:80")),
            ],
        ),
    ];

    for (name, retval, args) in &calls {
        let index = sender.resolve_index(name).unwrap_or(500);
        sender.emit(index, name, true, *retval, args)?;
        println!("✅ {} -> {}", name, retval);
    }

    // 3. Debug note and a memory dump
    println!("3️⃣  Sending debug note and buffer...");
    sender.emit_debug("demo finished")?;
    sender.emit_buffer(b"\x7fELF\x02\x01\x01")?;

    println!("\n🎉 All frames sent");

    Ok(())
}
