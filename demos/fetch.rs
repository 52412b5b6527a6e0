use rill::http::{fetch, FetchOptions};
use rill::Runtime;

fn main() -> Result<(), rill::Error> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://example.com/".to_string());

    let rt = Runtime::new();
    let response = rt.block_on(async move { fetch(&url, &FetchOptions::default()).await })?;

    match response.status {
        Some(status) => println!("status: {status}"),
        None => println!("status: unknown"),
    }
    println!("{}", response.text());

    Ok(())
}
