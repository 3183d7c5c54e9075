//! 数据源标识、本地化与运营商对照表

/// 通用城市库的来源标识
pub const SOURCE_MAXMIND: &str = "MaxMind";
/// 区域专用库的来源标识
pub const SOURCE_GEOCN: &str = "GeoCN";
pub const SOURCE_MAXMIND_WEB: &str = "maxmind-web";
pub const SOURCE_IPINFO: &str = "ipinfo";
pub const SOURCE_PRIVATE: &str = "private";

pub const PRIVATE_NETWORK_LABEL: &str = "私有网络";

/// 区域专用库覆盖的国家代码
pub const REGION_COUNTRY_CODE: &str = "CN";

/// 名称取值的语言优先级，全部缺失时取任意可用语言
pub const LANGUAGE_PRIORITY: &[&str] = &["zh-CN", "en"];

/// 单独报告的地区名称映射
pub const SPECIAL_REGIONS: &[(&str, &str)] = &[
    ("香港", "中国香港"),
    ("澳门", "中国澳门"),
    ("台湾", "中国台湾"),
];

/// 省级行政区简称，用于从全称中提取规范名
pub const PROVINCES: &[&str] = &[
    "北京", "天津", "河北", "山西", "内蒙古", "辽宁", "吉林", "黑龙江", "上海", "江苏", "浙江",
    "安徽", "福建", "江西", "山东", "河南", "湖北", "湖南", "广东", "广西", "海南", "重庆",
    "四川", "贵州", "云南", "西藏", "陕西", "甘肃", "青海", "宁夏", "新疆", "台湾", "香港",
    "澳门",
];

/// ASN → 运营商本地化名称
///
/// 覆盖主要基础运营商与云厂商，比 ASN 库中的组织名更易读
pub fn isp_name_for_asn(asn: u32) -> Option<&'static str> {
    let name = match asn {
        4134 | 4812 => "中国电信",
        4809 => "中国电信CN2",
        23764 => "中国电信CTGNet",
        4837 | 9929 | 17621 | 17816 => "中国联通",
        10099 => "中国联通国际",
        9808 | 24400 | 56040 | 56041 | 56046 | 56047 | 56048 => "中国移动",
        58453 => "中国移动国际",
        9231 => "中国移动香港",
        9394 => "中国铁通",
        4538 => "中国教育网",
        7497 => "中国科技网",
        37963 | 45102 => "阿里云",
        45090 | 132203 => "腾讯云",
        55990 | 136907 => "华为云",
        38365 | 55967 => "百度云",
        137718 => "火山引擎",
        135377 => "优刻得",
        59019 => "金山云",
        _ => return None,
    };
    Some(name)
}

/// 特别地区名称重映射
pub fn remap_special_region(name: &str) -> Option<&'static str> {
    SPECIAL_REGIONS
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| *to)
}

/// 从省份全称中匹配简称，未匹配返回 None
pub fn province_short_name(full_name: &str) -> Option<&'static str> {
    PROVINCES
        .iter()
        .copied()
        .find(|province| full_name.contains(province))
}
