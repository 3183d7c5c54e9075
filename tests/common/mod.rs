//! 集成测试公共工具
//!
//! - `MmdbBuilder`: 生成最小可用的 MMDB 文件（IPv6 树，32 位记录）
//! - `TestServer`: 本地 HTTP 服务，按路径返回预设响应

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// =============================================================================
// MMDB 数据编码
// =============================================================================

#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    F64(f64),
    U16(u16),
    U32(u32),
    U64(u64),
    Map(Vec<(String, Value)>),
    Array(Vec<Value>),
}

pub fn s(value: &str) -> Value {
    Value::Str(value.to_string())
}

pub fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// `{"en": .., "zh-CN": ..}` 形式的本地化名称
pub fn names(en: &str, zh: &str) -> Value {
    map(vec![("en", s(en)), ("zh-CN", s(zh))])
}

fn write_control(out: &mut Vec<u8>, type_num: u8, size: usize) {
    let (type_bits, extended) = if type_num <= 7 {
        (type_num, None)
    } else {
        (0, Some(type_num - 7))
    };

    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 285 {
        (29, vec![(size - 29) as u8])
    } else if size < 65_821 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65_821) as u32).to_be_bytes()[1..].to_vec())
    };

    out.push((type_bits << 5) | size_bits);
    if let Some(ext) = extended {
        out.push(ext);
    }
    out.extend_from_slice(&extra);
}

fn write_uint(out: &mut Vec<u8>, type_num: u8, bytes: &[u8]) {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    write_control(out, type_num, significant.len());
    out.extend_from_slice(significant);
}

fn encode(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Str(text) => {
            write_control(out, 2, text.len());
            out.extend_from_slice(text.as_bytes());
        }
        Value::F64(number) => {
            write_control(out, 3, 8);
            out.extend_from_slice(&number.to_be_bytes());
        }
        Value::U16(number) => write_uint(out, 5, &number.to_be_bytes()),
        Value::U32(number) => write_uint(out, 6, &number.to_be_bytes()),
        Value::U64(number) => write_uint(out, 9, &number.to_be_bytes()),
        Value::Map(entries) => {
            write_control(out, 7, entries.len());
            for (key, value) in entries {
                encode(&Value::Str(key.clone()), out);
                encode(value, out);
            }
        }
        Value::Array(items) => {
            write_control(out, 11, items.len());
            for item in items {
                encode(item, out);
            }
        }
    }
}

// =============================================================================
// MMDB 搜索树
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Slot {
    Empty,
    Node(usize),
    Data(usize),
}

pub struct MmdbBuilder {
    database_type: String,
    nodes: Vec<[Slot; 2]>,
    records: Vec<Value>,
}

impl MmdbBuilder {
    pub fn new(database_type: &str) -> Self {
        Self {
            database_type: database_type.to_string(),
            nodes: vec![[Slot::Empty, Slot::Empty]],
            records: Vec::new(),
        }
    }

    /// 插入网段，IPv4 映射到 ::a.b.c.d/(96 + prefix)
    pub fn insert(mut self, network: &str, record: Value) -> Self {
        let (addr, prefix) = network.split_once('/').unwrap_or((network, ""));
        let ip: IpAddr = addr.parse().expect("valid network address");
        let (bits, prefix) = match ip {
            IpAddr::V4(v4) => {
                let prefix: u32 = if prefix.is_empty() { 32 } else { prefix.parse().unwrap() };
                (u32::from(v4) as u128, prefix + 96)
            }
            IpAddr::V6(v6) => {
                let prefix: u32 = if prefix.is_empty() { 128 } else { prefix.parse().unwrap() };
                (u128::from(v6), prefix)
            }
        };
        assert!(prefix >= 1, "prefix must be at least 1 bit");

        let data = self.records.len();
        self.records.push(record);

        let mut node = 0;
        for depth in 0..prefix {
            let bit = ((bits >> (127 - depth)) & 1) as usize;
            if depth == prefix - 1 {
                self.nodes[node][bit] = Slot::Data(data);
                break;
            }
            node = match self.nodes[node][bit] {
                Slot::Node(next) => next,
                existing => {
                    let next = self.nodes.len();
                    // 更短的网段被拆分时，两侧继承原数据
                    let inherited = match existing {
                        Slot::Data(d) => Slot::Data(d),
                        _ => Slot::Empty,
                    };
                    self.nodes.push([inherited, inherited]);
                    self.nodes[node][bit] = Slot::Node(next);
                    next
                }
            };
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let node_count = self.nodes.len() as u32;

        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(self.records.len());
        for record in &self.records {
            offsets.push(data.len() as u32);
            encode(record, &mut data);
        }

        let mut out = Vec::new();
        for node in &self.nodes {
            for slot in node {
                let value = match *slot {
                    Slot::Empty => node_count,
                    Slot::Node(next) => next as u32,
                    Slot::Data(index) => node_count + 16 + offsets[index],
                };
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&data);

        out.extend_from_slice(b"\xAB\xCD\xEFMaxMind.com");
        let metadata = map(vec![
            ("binary_format_major_version", Value::U16(2)),
            ("binary_format_minor_version", Value::U16(0)),
            ("build_epoch", Value::U64(1_700_000_000)),
            ("database_type", s(&self.database_type)),
            ("description", map(vec![("en", s("ipgeo test fixture"))])),
            ("ip_version", Value::U16(6)),
            ("languages", Value::Array(vec![s("en"), s("zh-CN")])),
            ("node_count", Value::U32(node_count)),
            ("record_size", Value::U16(32)),
        ]);
        encode(&metadata, &mut out);
        out
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.build()).expect("write mmdb fixture");
    }
}

// =============================================================================
// 预置数据集
// =============================================================================

pub const CITY_DB: &str = "GeoLite2-City.mmdb";
pub const ASN_DB: &str = "GeoLite2-ASN.mmdb";
pub const REGION_DB: &str = "GeoCN.mmdb";

fn city_record(
    country: (&str, &str, &str),
    subdivision: Option<(&str, &str, &str)>,
    city: Option<(&str, &str)>,
    location: (f64, f64, u16, &str),
) -> Value {
    let country_value = map(vec![
        ("iso_code", s(country.0)),
        ("names", names(country.1, country.2)),
    ]);
    let mut entries = vec![
        ("country", country_value.clone()),
        ("registered_country", country_value),
        (
            "location",
            map(vec![
                ("latitude", Value::F64(location.0)),
                ("longitude", Value::F64(location.1)),
                ("accuracy_radius", Value::U16(location.2)),
                ("time_zone", s(location.3)),
            ]),
        ),
    ];
    if let Some((code, en, zh)) = subdivision {
        entries.push((
            "subdivisions",
            Value::Array(vec![map(vec![
                ("iso_code", s(code)),
                ("names", names(en, zh)),
            ])]),
        ));
    }
    if let Some((en, zh)) = city {
        entries.push(("city", map(vec![("names", names(en, zh))])));
    }
    map(entries)
}

fn asn_record(number: u32, organization: &str) -> Value {
    map(vec![
        ("autonomous_system_number", Value::U32(number)),
        ("autonomous_system_organization", s(organization)),
    ])
}

/// 替换城市记录的注册国
fn with_registered_country(record: Value, country: (&str, &str, &str)) -> Value {
    let Value::Map(mut entries) = record else {
        return record;
    };
    let registered = map(vec![
        ("iso_code", s(country.0)),
        ("names", names(country.1, country.2)),
    ]);
    for (key, value) in entries.iter_mut() {
        if key == "registered_country" {
            *value = registered.clone();
        }
    }
    Value::Map(entries)
}

/// 城市库：
/// - 8.8.8.0/24（美国山景城）
/// - 1.2.3.0/24（中国北京）
/// - 1.2.5.0/24（中国深圳，注册国为美国）
/// - 2001:db8::/32（日本）
pub fn city_database() -> MmdbBuilder {
    MmdbBuilder::new("GeoLite2-City")
        .insert(
            "8.8.8.0/24",
            city_record(
                ("US", "United States", "美国"),
                Some(("CA", "California", "加利福尼亚州")),
                Some(("Mountain View", "山景城")),
                (37.386, -122.0838, 50, "America/Los_Angeles"),
            ),
        )
        .insert(
            "1.2.3.0/24",
            city_record(
                ("CN", "China", "中国"),
                Some(("BJ", "Beijing", "北京市")),
                Some(("Beijing", "北京")),
                (39.9042, 116.4074, 50, "Asia/Shanghai"),
            ),
        )
        .insert(
            "1.2.5.0/24",
            with_registered_country(
                city_record(
                    ("CN", "China", "中国"),
                    Some(("GD", "Guangdong", "广东省")),
                    Some(("Shenzhen", "深圳")),
                    (22.5431, 114.0579, 50, "Asia/Shanghai"),
                ),
                ("US", "United States", "美国"),
            ),
        )
        .insert(
            "2001:db8::/32",
            city_record(
                ("JP", "Japan", "日本"),
                Some(("13", "Tokyo", "东京都")),
                Some(("Tokyo", "东京")),
                (35.6895, 139.6917, 5, "Asia/Tokyo"),
            ),
        )
}

pub fn asn_database() -> MmdbBuilder {
    MmdbBuilder::new("GeoLite2-ASN")
        .insert("8.8.8.0/24", asn_record(15169, "GOOGLE"))
        .insert("1.2.3.0/24", asn_record(4134, "Chinanet"))
}

/// 区域库：
/// - 1.2.3.0/24（北京海淀，原生坐标）
/// - 1.2.4.0/24（上海，无坐标，城市库无记录）
/// - 1.2.5.0/24（深圳南山，注册国不在区域内）
/// - 1.2.6.0/24（杭州西湖，原生坐标，城市库无记录）
pub fn region_database() -> MmdbBuilder {
    MmdbBuilder::new("GeoCN")
        .insert(
            "1.2.3.0/24",
            map(vec![
                ("country", s("中国")),
                ("province", s("北京市")),
                ("city", s("北京市")),
                ("district", s("海淀区")),
                ("isp", s("电信")),
                ("type", s("宽带")),
                ("lat", Value::F64(39.959)),
                ("lng", s("116.298")),
            ]),
        )
        .insert(
            "1.2.4.0/24",
            map(vec![
                ("country", s("中国")),
                ("province", s("上海市")),
                ("city", s("上海市")),
                ("district", s("浦东新区")),
                ("isp", s("联通")),
            ]),
        )
        .insert(
            "1.2.5.0/24",
            map(vec![
                ("country", s("中国")),
                ("province", s("广东省")),
                ("city", s("深圳市")),
                ("district", s("南山区")),
                ("isp", s("移动")),
                ("type", s("宽带")),
                ("lat", Value::F64(22.5333)),
                ("lng", Value::F64(113.9304)),
            ]),
        )
        .insert(
            "1.2.6.0/24",
            map(vec![
                ("country", s("中国")),
                ("province", s("浙江省")),
                ("city", s("杭州市")),
                ("district", s("西湖区")),
                ("isp", s("电信")),
                ("type", s("数据中心")),
                ("lat", Value::F64(30.2592)),
                ("lng", Value::F64(120.1300)),
            ]),
        )
}

/// 在目录中写入全部三个库
pub fn write_all_databases(dir: &Path) {
    city_database().write_to(&dir.join(CITY_DB));
    asn_database().write_to(&dir.join(ASN_DB));
    region_database().write_to(&dir.join(REGION_DB));
}

// =============================================================================
// 本地 HTTP 服务
// =============================================================================

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    /// 响应前等待的时间
    pub delay: Duration,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// 收到的请求：请求行与头部原文
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub head: String,
}

pub struct TestServer {
    pub addr: SocketAddr,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();

        let (routes_task, requests_task) = (Arc::clone(&routes), Arc::clone(&requests));
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&routes_task);
                let requests = Arc::clone(&requests_task);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let head = String::from_utf8_lossy(&buf).to_string();
                    let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let path = target.split('?').next().unwrap_or("/").to_string();
                    requests.lock().push(RecordedRequest {
                        path: target,
                        head,
                    });

                    let route = routes
                        .lock()
                        .get(&path)
                        .cloned()
                        .unwrap_or_else(|| Route::status(404));
                    if !route.delay.is_zero() {
                        tokio::time::sleep(route.delay).await;
                    }
                    let reason = match route.status {
                        200 => "OK",
                        404 => "Not Found",
                        _ => "Error",
                    };
                    let header = format!(
                        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n",
                        route.status,
                        reason,
                        route.body.len()
                    );
                    let _ = stream.write_all(header.as_bytes()).await;
                    let _ = stream.write_all(&route.body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            addr,
            routes,
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn route(&self, path: &str, route: Route) {
        self.routes.lock().insert(path.to_string(), route);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// 指定路径（不含查询串）被请求的次数
    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path.split('?').next() == Some(path))
            .count()
    }
}
