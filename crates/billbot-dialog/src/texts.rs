//! User-visible texts.

pub const SKIP: &str = "Пропустить";
pub const YES: &str = "Да";
pub const NO: &str = "Нет";
pub const REJECT: &str = "Отклонить";

pub const FOREIGN_USER: &str =
    "Вы не можете отвечать на это сообщение, так как другой пользователь вызвал команду /bill.";
pub const FOREIGN_CHAT: &str =
    "Вы не можете отвечать на это сообщение, так как вызвали команду /bill в другом чате.";
pub const FOREIGN_MESSAGE: &str =
    "Вы не можете отвечать на это сообщение, так как это другое сообщение в ответ на /bill.";
pub const DIALOG_BUSY: &str =
    "Другой пользователь уже заполняет счёт в этом чате. Дождитесь окончания.";

pub const ACCESS_DENIED: &str = "Вам отказано в доступе";
pub const ANSWER_ACCEPTED: &str = "Ответ принят";
pub const CANCELLED: &str = "Отмена";
pub const CONFIRM_HEADER: &str = "Эти данные верны?";
pub const AWAIT_ADMIN: &str = "Ожидайте ответа от администрации.";
pub const APPROVAL_REQUESTED: &str =
    "Запрос на подтверждение платежа был отправлен администратору.";
pub const APPROVAL_HEADER: &str = "Подтвердить данный запрос?";
pub const REQUEST_REJECTED: &str = "Ваш запрос был отклонен.";
pub const NO_DOCUMENT: &str = "Произошла ошибка, pdf не был передан. Сообщите администратору";
pub const BUTTON_BROKEN: &str = "Эта кнопка не работает, что-то пошло не так.";

pub const SERVER_RETRY: &str = "Произошла проблема на сервере. Попробуйте еще раз.";
pub const DATA_ERROR: &str = "Ошибочные данные с сервера, прекращаю /bill диалог.";

pub const CHAT_CONFIRMED: &str = "Чат подтвержден, как действительный.";
pub const NO_ADMIN_RIGHTS: &str = "У вас нет прав администратора.";
pub const ADDED_TO_CHAT: &str =
    "Бот работает только в чатах, созданных вместе с ним. Покидаю чат.";

/// Notice when the access check could not be completed
pub fn access_problem(reason: &str) -> String {
    format!("Проблемы с доступом к серверу: {}", reason)
}

/// Notice when the server stopped the dialog
pub fn terminated(reason: &str, destroy: bool) -> String {
    if destroy {
        format!("{}. Заканчиваю ввод данных.", reason)
    } else {
        reason.to_string()
    }
}

/// Caption sent with the generated bill
pub fn document_caption(path: &str) -> String {
    format!("Вот ваш счёт и ссылка на него: {}", path)
}

/// Label of a legal entity option
pub fn legal_entity(name: &str, inn: &str) -> String {
    format!("{}, ИНН: {}", name, inn)
}
