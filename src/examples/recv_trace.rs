use netlog::*;
use std::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let storage = std::env::args().nth(1).unwrap_or_else(|| "netlog-storage".into());

    println!("🌀 netlog - Receiver");
    println!("📡 Listening on 127.0.0.1:2042, storing buffers under {}\n", storage);

    let listener = TcpListener::bind("127.0.0.1:2042")?;

    for (session, stream) in listener.incoming().enumerate() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!("❌ Accept error: {}", e);
                continue;
            }
        };

        match read_handshake(&mut stream) {
            Ok(Protocol::Bson) => {}
            Ok(Protocol::Other(name)) => {
                eprintln!("❌ Unsupported protocol {:?}", name);
                continue;
            }
            Err(e) => {
                eprintln!("❌ Handshake failed: {}", e);
                continue;
            }
        }

        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("📦 Session #{}", session);

        // One receiver per connection; nothing is shared between sessions
        let buffers = DirBufferSink::new(&storage)?;
        let mut receiver = Receiver::with_buffer_sink(stream, buffers);
        let mut sink = JsonLinesSink::new(std::io::stdout());
        let count = receiver.drain(&mut sink)?;

        println!("   Records: {}", count);
        println!("   Bytes: {}", receiver.bytes_consumed());
        println!("   Described calls: {}", receiver.schema().len());
        if let Some(fault) = receiver.fault() {
            println!("   ⚠️  Stream ended early: {}", fault);
        }
        println!();
    }

    Ok(())
}
