//! Human-readable descriptions of device status codes
//!
//! Operators of the rig read these in Russian or English; the language is
//! chosen in the configuration.

use crate::session::SessionError;
use crate::status::{DeviceKind, DeviceStatus};
use serde::{Deserialize, Serialize};

/// Language of operator-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    #[default]
    Ru,
}

/// Bare message text for a code
pub fn message(device: DeviceKind, code: i32, language: Language) -> &'static str {
    match (device, language) {
        (DeviceKind::PowerSupply, Language::En) => power_supply_en(code),
        (DeviceKind::PowerSupply, Language::Ru) => power_supply_ru(code),
        (DeviceKind::StepMotor, Language::En) => step_motor_en(code),
        (DeviceKind::StepMotor, Language::Ru) => step_motor_ru(code),
    }
}

/// Full operator message, e.g. `power_supply: Error code: 4. Message: ...`
pub fn describe(device: DeviceKind, code: i32, language: Language) -> String {
    let text = message(device, code, language);
    match language {
        Language::En => format!("{}: Error code: {}. Message: {}", device, code, text),
        Language::Ru => format!("{}: Код ошибки: {}. Сообщение: {}", device, code, text),
    }
}

/// Describe a typed device error
pub fn describe_error<E: DeviceStatus>(error: E, language: Language) -> String {
    describe(E::DEVICE, error.code(), language)
}

/// Warning for setpoints at or above the overheat threshold
pub fn overheat_warning(language: Language) -> &'static str {
    match language {
        Language::En => {
            "Crucible may overheat: the current setpoint is close to the maximum of 200 A."
        }
        Language::Ru => {
            "Опасность перегрева тигля. Введенное значение тока близко к максимуму. Максимальное значение - 200 А"
        }
    }
}

/// Operator text for a session that could not start
pub fn describe_session_error(error: SessionError, language: Language) -> String {
    let text = match (error, language) {
        (SessionError::Device(e), _) => return describe_error(e, language),
        (SessionError::CurrentOutOfRange(_), Language::En) => {
            "Invalid current setpoint. Allowed range: 0-200 A."
        }
        (SessionError::CurrentOutOfRange(_), Language::Ru) => {
            "Неверное значение. Допустимый диапазон: 0-200 А"
        }
        (SessionError::EmptyCountdown, Language::En) => "Enter a countdown longer than zero.",
        (SessionError::EmptyCountdown, Language::Ru) => "Введите корректное значение времени.",
        (SessionError::AlreadyRunning, Language::En) => "A session is already running.",
        (SessionError::AlreadyRunning, Language::Ru) => "Сеанс уже запущен.",
    };
    format!("{}: {}", DeviceKind::PowerSupply, text)
}

fn power_supply_en(code: i32) -> &'static str {
    match code {
        -2 => "Error reading voltage register 21 (0x15).",
        -1 => "Error reading current register 20 (0x14).",
        0 => "Operation successful.",
        1 => "Failed to initialize connection.",
        2 => "Failed to set device as slave.",
        3 => "Failed to connect to the device.",
        4 => "Failed to set current setpoint.",
        5 => "Failed to set voltage setpoint.",
        6 => "Failed to turn on the power supply.",
        7 => "Failed to activate work mode.",
        8 => "Failed to reset current setpoint.",
        9 => "Failed to reset voltage setpoint.",
        10 => "Failed to reset work mode.",
        11 => "Failed to turn off the power supply.",
        12 => "Failed to reset ZP register (36).",
        13 => "Unsupported timer value.",
        _ => "Unknown error.",
    }
}

fn power_supply_ru(code: i32) -> &'static str {
    match code {
        -2 => "Не удалось прочитать значение напряжения с регистра 21 (0x15).",
        -1 => "Не удалось прочитать значение тока с регистра 20 (0x14).",
        0 => "Операция прошла успешно.",
        1 => "Не удалось инициализировать соединение.",
        2 => "Не удалось установить устройство как slave.",
        3 => "Не удалось подключиться к устройству.",
        4 => "Не удалось установить уставку тока.",
        5 => "Не удалось установить уставку напряжения.",
        6 => "Не удалось включить блок питания.",
        7 => "Не удалось активировать рабочий режим.",
        8 => "Не удалось сбросить уставку тока.",
        9 => "Не удалось сбросить уставку напряжения.",
        10 => "Не удалось сбросить рабочий режим.",
        11 => "Не удалось выключить блок питания.",
        12 => "Не удалось сбросить регистр ЗП (36).",
        13 => "Неподдерживаемое значение таймера.",
        _ => "Неизвестная ошибка.",
    }
}

fn step_motor_en(code: i32) -> &'static str {
    match code {
        -1 => "Failed to read or write a holding register.",
        0 => "Operation successful.",
        1 => "Failed to initialize connection.",
        2 => "Failed to set device as slave.",
        3 => "Failed to connect to the device.",
        4 => "The stepper motor could not be started in FORWARD mode (set register 512 to 1).",
        5 => "The stepper motor could not be started in REVERSE mode (set register 513 to 1).",
        6 => "Failed to reset FORWARD mode of the stepper motor (set register 512 to 0).",
        7 => "Failed to reset REVERSE mode of the stepper motor (set register 513 to 0).",
        8 => "Shutter already closed.",
        _ => "Unknown error.",
    }
}

fn step_motor_ru(code: i32) -> &'static str {
    match code {
        -1 => "Не удалось прочитать или записать holding-регистр.",
        0 => "Операция прошла успешно.",
        1 => "Не удалось инициализировать соединение.",
        2 => "Не удалось установить устройство как slave.",
        3 => "Не удалось подключиться к устройству.",
        4 => "Не удалось запустить шаговый двигатель в режиме FORWARD (установить значение 512 регистра в 1).",
        5 => "Не удалось запустить шаговый двигатель в режиме REVERSE (установить значение 513 регистра в 1).",
        6 => "Не удалось произвести сброс режима FORWARD у шагового двигателя (установить значение 512 регистра в 0).",
        7 => "Не удалось произвести сброс режима REVERSE у шагового двигателя (установить значение 513 регистра в 0).",
        8 => "Заслонка уже закрыта.",
        _ => "Неизвестная ошибка.",
    }
}
