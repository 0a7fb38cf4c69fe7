//! API DTOs used by the port manager.

pub use common::api::{
    missing_port_error, AdapterUsage, AddrInfo, AddressFamily, AssignableAdapters, CellularConfig,
    DeviceNetworkStatus, DevicePortConfig, DevicePortConfigList, DhcpMode, DpcState, GeoInfo,
    IntfStatusMap, IoAdapter, PortConfig, PortStatus, RadioSilence, TestResults, WifiConfig,
    WifiKeyScheme, WirelessConfig, WirelessKind, WirelessStatus, WwanCellModule, WwanConfig,
    WwanControlProtocol, WwanMetrics, WwanNetworkConfig, WwanNetworkMetrics, WwanNetworkStatus,
    WwanOpMode, WwanPacketStats, WwanPhysAddrs, WwanProvider, WwanSignalInfo, WwanSimCard,
    WwanStatus, DPC_VERSION,
};
