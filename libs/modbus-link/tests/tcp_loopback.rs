//! End-to-end over real Modbus TCP against an in-process tokio-modbus server

#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable

use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::sync::Arc;

use modbus_link::{ClientConfig, ClientError, ConnectionState, ModbusClient, PollingConfig};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

/// Addresses at or above this answer IllegalDataAddress
const DEVICE_SIZE: u32 = 1000;

#[derive(Clone, Default)]
struct TestDevice {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    coils: Arc<Mutex<HashMap<u16, bool>>>,
}

impl TestDevice {
    fn check_range(addr: u16, cnt: usize) -> Result<(), ExceptionCode> {
        if addr as u32 + cnt as u32 > DEVICE_SIZE {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(())
    }

    fn read_registers(&self, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        Self::check_range(addr, cnt as usize)?;
        let registers = self.registers.lock();
        Ok((0..cnt)
            .map(|i| registers.get(&(addr + i)).copied().unwrap_or(0))
            .collect())
    }

    fn write_registers(&self, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        Self::check_range(addr, values.len())?;
        let mut registers = self.registers.lock();
        for (i, value) in values.iter().enumerate() {
            registers.insert(addr + i as u16, *value);
        }
        Ok(())
    }

    fn read_coils(&self, addr: u16, cnt: u16) -> Result<Vec<bool>, ExceptionCode> {
        Self::check_range(addr, cnt as usize)?;
        let coils = self.coils.lock();
        Ok((0..cnt)
            .map(|i| coils.get(&(addr + i)).copied().unwrap_or(false))
            .collect())
    }

    fn write_coils(&self, addr: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        Self::check_range(addr, values.len())?;
        let mut coils = self.coils.lock();
        for (i, value) in values.iter().enumerate() {
            coils.insert(addr + i as u16, *value);
        }
        Ok(())
    }
}

impl tokio_modbus::server::Service for TestDevice {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                self.read_registers(addr, cnt).map(Response::ReadHoldingRegisters)
            },
            Request::ReadInputRegisters(addr, cnt) => {
                self.read_registers(addr, cnt).map(Response::ReadInputRegisters)
            },
            Request::WriteSingleRegister(addr, value) => self
                .write_registers(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleRegisters(addr, values) => self
                .write_registers(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::ReadCoils(addr, cnt) => self.read_coils(addr, cnt).map(Response::ReadCoils),
            Request::ReadDiscreteInputs(addr, cnt) => {
                self.read_coils(addr, cnt).map(Response::ReadDiscreteInputs)
            },
            Request::WriteSingleCoil(addr, value) => self
                .write_coils(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleCoil(addr, value)),
            Request::WriteMultipleCoils(addr, values) => self
                .write_coils(addr, &values)
                .map(|_| Response::WriteMultipleCoils(addr, values.len() as u16)),
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(res)
    }
}

async fn start_device(device: TestDevice) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();

    let server = Server::new(listener);
    let on_connected = move |stream, socket_addr| {
        let device = device.clone();
        async move { accept_tcp_connection(stream, socket_addr, move |_| Ok(Some(device.clone()))) }
    };
    let on_process_error = |err| {
        eprintln!("Server error: {}", err);
    };

    tokio::spawn(async move {
        if let Err(e) = server.serve(&on_connected, on_process_error).await {
            eprintln!("Server error: {}", e);
        }
    });

    socket_addr
}

async fn connect(socket_addr: SocketAddr) -> ModbusClient {
    let config = ClientConfig {
        timeout_ms: 1000,
        ..ClientConfig::new(socket_addr.ip().to_string(), socket_addr.port(), 1)
    };
    let client = ModbusClient::init(config)
        .unwrap()
        .with_polling(PollingConfig::requests_only())
        .unwrap();
    client.start().await.unwrap();
    client
}

#[tokio::test]
async fn test_register_round_trip_over_tcp() {
    let socket_addr = start_device(TestDevice::default()).await;
    let client = connect(socket_addr).await;
    assert_eq!(client.get_state(), ConnectionState::Connected);

    client.write_single_register(10, 0x1234).await.unwrap();
    assert_eq!(client.read_holding(10, 1).await.unwrap(), vec![0x1234]);

    client
        .write_multiple_registers(20, 4, &[1, 2, 3, 4])
        .await
        .unwrap();
    assert_eq!(client.read_input(19, 6).await.unwrap(), vec![0, 1, 2, 3, 4, 0]);

    client.stop().await;
}

#[tokio::test]
async fn test_coils_over_tcp() {
    let socket_addr = start_device(TestDevice::default()).await;
    let client = connect(socket_addr).await;

    client
        .write_multiple_coils(0, 3, &[true, false, true])
        .await
        .unwrap();
    client.write_single_coil(9, true).await.unwrap();

    let coils = client.read_coils(0, 10).await.unwrap();
    assert_eq!(coils.len(), 10);
    assert_eq!(
        coils,
        vec![true, false, true, false, false, false, false, false, false, true]
    );
    assert_eq!(client.read_discrete(1, 2).await.unwrap(), vec![false, true]);

    client.stop().await;
}

#[tokio::test]
async fn test_illegal_address_is_protocol_error() {
    let socket_addr = start_device(TestDevice::default()).await;
    let client = connect(socket_addr).await;

    assert_eq!(
        client.read_holding(999, 2).await,
        Err(ClientError::ProtocolError(0x02))
    );
    // Exception responses leave the session usable
    assert_eq!(client.get_state(), ConnectionState::Connected);
    assert_eq!(client.read_holding(998, 2).await.unwrap(), vec![0, 0]);

    client.stop().await;
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig {
        timeout_ms: 1000,
        auto_reconnect: false,
        ..ClientConfig::new("127.0.0.1", socket_addr.port(), 1)
    };
    let client = ModbusClient::init(config)
        .unwrap()
        .with_polling(PollingConfig::requests_only())
        .unwrap();

    let err = client.start().await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(client.get_state(), ConnectionState::Error);

    client.stop().await;
    assert_eq!(client.get_state(), ConnectionState::Disconnected);
}
