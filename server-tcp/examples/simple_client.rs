use serde_json::json;
use server_tcp::TcpClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5600".to_string());

    let mut client = TcpClient::connect(addr.as_str()).await?;
    println!("Connected to server at {}", addr);

    println!("\n=== Testing PING ===");
    client.ping().await?;
    println!("Response: PONG");

    println!("\n=== Testing KEYS ===");
    println!("Response: {:?}", client.keys().await?);

    println!("\n=== Testing SET ===");
    match client
        .set("Key1", &json!({"name": "bingoo", "age": 30}), Some(60_000))
        .await
    {
        Ok(()) => println!("Response: OK"),
        Err(e) => println!("Response: {} (does the row exist?)", e),
    }

    println!("\n=== Testing GET ===");
    println!("Response: {:?}", client.get("Key1").await?);

    println!("\n=== Testing DEL ===");
    println!("Response: deleted={}", client.del("Key1").await?);

    Ok(())
}
