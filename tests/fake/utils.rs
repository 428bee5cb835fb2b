// Get a free port for the configuration, so tests can run in parallel
pub fn find_free_port(listen_address: Option<&str>) -> u16 {
    let listen_address = listen_address.unwrap_or("127.0.0.1");
    match std::net::TcpListener::bind(format!("{}:0", listen_address)) {
        Ok(listener) => listener.local_addr().unwrap().port(),
        Err(e) => {
            panic!("Error binding listener: {:?}", e);
        }
    }
}
