use codegraph::indexer::Indexer;
use codegraph::mcp::Session;
use codegraph::server;
use codegraph::service::IndexService;
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

fn service() -> (TempDir, Arc<IndexService>) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("shop.py"),
        concat!(
            "class Cart:\n",
            "    def total(self):\n        return self.subtotal()\n\n",
            "    def subtotal(self):\n        return 0\n\n",
            "def checkout(cart):\n    return cart.total()\n",
        ),
    )
    .unwrap();
    let indexer = Indexer::new(dir.path().to_path_buf()).unwrap();
    let index_path = codegraph::db::default_index_path(dir.path());
    let (service, _) = IndexService::open_or_build(indexer, index_path, false).unwrap();
    (dir, Arc::new(service))
}

fn request(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

#[test]
fn operations_before_initialize_are_refused() {
    let (_dir, service) = service();
    let session = Session::new(service);
    let refused = session
        .handle_message(request(1, "navigate", json!({ "function": "checkout" })))
        .unwrap();
    assert_eq!(refused["id"], 1);
    assert_eq!(refused["error"]["code"], -32002);
    assert_eq!(refused["error"]["data"]["kind"], "not_initialized");
}

#[test]
fn error_codes_follow_the_table() {
    let (_dir, service) = service();
    let session = Session::new(service);
    session.handle_message(request(1, "initialize", json!({})));

    let unknown = session.handle_message(request(2, "teleport", json!({}))).unwrap();
    assert_eq!(unknown["error"]["code"], -32601);

    let missing = session.handle_message(request(3, "navigate", json!({}))).unwrap();
    assert_eq!(missing["error"]["code"], -32602);
    assert_eq!(missing["error"]["data"]["kind"], "invalid_argument");

    let not_found = session
        .handle_message(request(4, "impact", json!({ "function": "nowhere" })))
        .unwrap();
    assert_eq!(not_found["error"]["code"], -32000);

    let parse = session.handle_line("{\"jsonrpc\": \"2.0\", ").unwrap();
    assert_eq!(parse["error"]["code"], -32700);
    assert_eq!(parse["id"], Value::Null);
}

#[test]
fn operations_return_documented_shapes() {
    let (_dir, service) = service();
    let session = Session::preinitialized(service);

    let nav = session
        .handle_message(request(1, "navigate", json!({ "function": "Cart.total", "depth": 1 })))
        .unwrap();
    let result = &nav["result"];
    assert_eq!(result["function"]["qualified_name"], "Cart.total");
    assert_eq!(result["calls"][0]["qualified_name"], "Cart.subtotal");
    assert_eq!(result["called_by"][0]["name"], "checkout");
    assert_eq!(result["siblings"][0]["name"], "subtotal");
    assert!(result["summary"].as_str().unwrap().contains("Cart.total"));

    let impact = session
        .handle_message(request(2, "impact", json!({ "function": "subtotal" })))
        .unwrap();
    assert_eq!(impact["result"]["risk_level"], "low");
    assert_eq!(impact["result"]["direct_callers"][0]["qualified_name"], "Cart.total");
    assert_eq!(impact["result"]["transitive_callers"].as_array().unwrap().len(), 2);
    assert_eq!(impact["result"]["files_affected"], json!(["shop.py"]));

    let status = session.handle_message(request(3, "status", json!({}))).unwrap();
    assert_eq!(status["result"]["generation"], 1);
    assert_eq!(status["result"]["symbols"], 4);
}

#[test]
fn tools_list_describes_every_operation() {
    let (_dir, service) = service();
    let session = Session::new(service);
    session.handle_message(request(1, "initialize", json!({})));
    let listed = session.handle_message(request(2, "tools/list", json!({}))).unwrap();
    let tools = listed["result"]["tools"].as_array().unwrap();
    for tool in tools {
        assert!(tool["description"].as_str().is_some_and(|d| !d.is_empty()));
        assert_eq!(tool["inputSchema"]["type"], "object");
    }
    let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["find", "navigate", "impact", "status"]);
}

async fn send(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    message: Value,
) -> Value {
    let mut frame = serde_json::to_vec(&message).unwrap();
    frame.push(b'\n');
    writer.write_all(&frame).await.unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_connections_have_their_own_handshake() {
    let (_dir, service) = service();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve_listener(listener, service));

    let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut lines = BufReader::new(read).lines();
    let init = send(&mut write, &mut lines, request(1, "initialize", json!({}))).await;
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
    let found = send(&mut write, &mut lines, request(2, "find", json!({ "query": "total" }))).await;
    assert_eq!(found["id"], 2);
    assert_eq!(found["result"]["matches"][0]["qualified_name"], "Cart.total");

    let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut lines = BufReader::new(read).lines();
    let find = request(1, "find", json!({ "query": "total" }));
    let refused = send(&mut write, &mut lines, find).await;
    assert_eq!(refused["error"]["code"], -32002);
    let garbage = send(&mut write, &mut lines, json!("not an object")).await;
    assert_eq!(garbage["error"]["code"], -32600);
}
