//! `kiln add`, `kiln index`, `kiln stats`, `kiln clear`, `kiln sources`.

use kiln_config::AppConfig;
use kiln_server::{Client, Request, RequestKind};

pub async fn run(
    config: &AppConfig,
    kind: RequestKind,
    content: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(&config.server.socket_path);
    let mut request = Request::new(kind, content);
    if let Some(pwd) = super::working_dir() {
        request = request.with_pwd(pwd);
    }
    let reply = client.stream(&request, |_| {}).await?;
    println!("{reply}");
    Ok(())
}
