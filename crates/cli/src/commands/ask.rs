//! `kiln chat` and `kiln edit`: send a message and print the answer as it
//! streams in.

use kiln_config::AppConfig;
use kiln_server::{Client, Request, RequestKind};
use std::io::Write;

pub async fn run(
    config: &AppConfig,
    kind: RequestKind,
    message: String,
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(&config.server.socket_path);
    let mut request = Request::new(kind.clone(), message);
    if let Some(pwd) = super::working_dir() {
        request = request.with_pwd(pwd);
    }
    if let Some(secs) = timeout {
        request = request.with_timeout_secs(secs);
    }

    // Plain chat output is the answer itself. In edit mode the stream also
    // carries tool-call markup, so it goes to stderr as progress and the
    // cleaned answer is printed at the end.
    let live_answer = kind == RequestKind::Chat;
    let answer = client
        .stream(&request, |chunk| {
            if live_answer {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(chunk.as_bytes());
                let _ = out.flush();
            } else {
                eprint!("{chunk}");
            }
        })
        .await?;

    if live_answer {
        println!();
    } else {
        eprintln!();
        println!("\n{answer}");
    }
    Ok(())
}
