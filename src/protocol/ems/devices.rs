/// Static tables of known bus participants, keyed by the product id found in their Version
/// telegram.
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::types::{ID_BOILER, ID_NONE};

/// Model families the engine knows how to poll.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum DeviceModel {
    None,
    All,
    #[strum(serialize = "UBA")]
    Uba,
    #[strum(serialize = "ES73")]
    Es73,
    #[strum(serialize = "RC10")]
    Rc10,
    #[strum(serialize = "RC20")]
    Rc20,
    #[strum(serialize = "RC20F")]
    Rc20F,
    #[strum(serialize = "RC30")]
    Rc30,
    #[strum(serialize = "RC35")]
    Rc35,
    #[strum(serialize = "RC310")]
    Rc310,
    #[strum(serialize = "CW100")]
    Cw100,
    #[strum(serialize = "EASY")]
    Easy,
    #[strum(serialize = "BOSCHEASY")]
    BoschEasy,
    #[strum(serialize = "OT")]
    OpenTherm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Brand {
    Unknown,
    Bosch,
    Junkers,
    Buderus,
    Nefit,
    Sieger,
    Worcester,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum DeviceKind {
    Boiler,
    Thermostat,
}

/// One row of a device table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub model: DeviceModel,
    pub product_id: u8,
    /// Bus address the device answers on.
    pub type_id: u8,
    pub name: &'static str,
    pub brand: Brand,
    pub read_supported: bool,
    pub write_supported: bool,
}

const fn boiler(product_id: u8, name: &'static str, brand: Brand) -> DeviceRecord {
    DeviceRecord {
        model: DeviceModel::Uba,
        product_id,
        type_id: ID_BOILER,
        name,
        brand,
        read_supported: true,
        write_supported: true,
    }
}

const fn thermostat(
    model: DeviceModel,
    product_id: u8,
    type_id: u8,
    name: &'static str,
    brand: Brand,
    read_supported: bool,
    write_supported: bool,
) -> DeviceRecord {
    DeviceRecord {
        model,
        product_id,
        type_id,
        name,
        brand,
        read_supported,
        write_supported,
    }
}

pub static BOILER_TYPES: &[DeviceRecord] = &[
    boiler(72, "MC10 Module", Brand::Buderus),
    boiler(123, "Buderus GB172/Nefit Trendline/Junkers Cerapur", Brand::Buderus),
    boiler(115, "Nefit Topline Compact/Buderus GB162", Brand::Nefit),
    boiler(203, "Buderus Logamax U122", Brand::Buderus),
    boiler(208, "Buderus Logamax plus/GB192", Brand::Buderus),
    boiler(64, "Sieger BK15 Boiler/Nefit Smartline", Brand::Sieger),
    boiler(95, "Bosch Condens 2500/Buderus Logamax GB062/Junkers Heatronic 3", Brand::Bosch),
    boiler(122, "Nefit Proline", Brand::Nefit),
    boiler(172, "Nefit Enviline", Brand::Nefit),
];

#[rustfmt::skip]
pub static THERMOSTAT_TYPES: &[DeviceRecord] = &[
    thermostat(DeviceModel::Es73, 76, 0x10, "Sieger ES73", Brand::Sieger, true, true),
    thermostat(DeviceModel::Rc10, 79, 0x17, "RC10/Nefit Moduline 100", Brand::Buderus, true, true),
    thermostat(DeviceModel::Rc20, 77, 0x17, "RC20/Nefit Moduline 300", Brand::Buderus, true, true),
    thermostat(DeviceModel::Rc20F, 93, 0x18, "RC20F", Brand::Buderus, true, true),
    thermostat(DeviceModel::Rc30, 78, 0x10, "RC30/Nefit Moduline 400", Brand::Buderus, true, true),
    thermostat(DeviceModel::Rc35, 86, 0x10, "RC35", Brand::Buderus, true, true),
    thermostat(DeviceModel::Easy, 202, 0x18, "TC100/Nefit Easy", Brand::Nefit, true, false),
    thermostat(DeviceModel::BoschEasy, 206, 0x02, "Bosch Easy", Brand::Bosch, true, false),
    thermostat(DeviceModel::Rc310, 158, 0x10, "RC310", Brand::Buderus, false, false),
    thermostat(DeviceModel::Cw100, 157, 0x18, "CW100", Brand::Junkers, false, false),
    thermostat(DeviceModel::OpenTherm, 171, 0x02, "EMS-OT OpenTherm converter", Brand::Unknown, false, false),
];

/// Linear scan, first match wins.
pub fn lookup_by_product_id(table: &[DeviceRecord], product_id: u8) -> Option<DeviceRecord> {
    table
        .iter()
        .find(|record| record.product_id == product_id)
        .copied()
}

/// First table row describing `model`, used when a thermostat model is preset in config.
pub fn lookup_by_model(table: &[DeviceRecord], model: DeviceModel) -> Option<DeviceRecord> {
    table.iter().find(|record| record.model == model).copied()
}

/// Every known bus address except "none" and `own_id`, sorted and de-duplicated.
pub fn scan_targets(own_id: u8) -> Vec<u8> {
    let mut ids: Vec<u8> = BOILER_TYPES
        .iter()
        .chain(THERMOSTAT_TYPES.iter())
        .map(|record| record.type_id)
        .filter(|&id| id != ID_NONE && id != own_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
