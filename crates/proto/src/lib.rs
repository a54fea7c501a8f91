//! 订单事件 Protobuf 定义
//!
//! 结账服务在 `orders` topic 上发布的 `OrderResult` 消息及其嵌套类型。
//! 字段号与 `proto/demo.proto` 一致；直接使用 prost 派生宏而非构建期代码生成，
//! 部署环境无需安装 protoc。

/// 订单事件使用的消息类型，对应 proto 包 `oteldemo`
pub mod oteldemo {
    /// 购物车条目
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CartItem {
        #[prost(string, tag = "1")]
        pub product_id: ::prost::alloc::string::String,
        #[prost(int32, tag = "2")]
        pub quantity: i32,
    }

    /// 金额：整数部分 + 纳单位小数部分，避免浮点误差
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Money {
        #[prost(string, tag = "1")]
        pub currency_code: ::prost::alloc::string::String,
        #[prost(int64, tag = "2")]
        pub units: i64,
        #[prost(int32, tag = "3")]
        pub nanos: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Address {
        #[prost(string, tag = "1")]
        pub street_address: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub city: ::prost::alloc::string::String,
        #[prost(string, tag = "3")]
        pub state: ::prost::alloc::string::String,
        #[prost(string, tag = "4")]
        pub country: ::prost::alloc::string::String,
        #[prost(string, tag = "5")]
        pub zip_code: ::prost::alloc::string::String,
    }

    /// 订单行：商品条目 + 单价
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct OrderItem {
        #[prost(message, optional, tag = "1")]
        pub item: ::core::option::Option<CartItem>,
        #[prost(message, optional, tag = "2")]
        pub cost: ::core::option::Option<Money>,
    }

    /// 一次结账完成后产生的订单结果
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct OrderResult {
        #[prost(string, tag = "1")]
        pub order_id: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub shipping_tracking_id: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "3")]
        pub shipping_cost: ::core::option::Option<Money>,
        #[prost(message, optional, tag = "4")]
        pub shipping_address: ::core::option::Option<Address>,
        #[prost(message, repeated, tag = "5")]
        pub items: ::prost::alloc::vec::Vec<OrderItem>,
    }
}
